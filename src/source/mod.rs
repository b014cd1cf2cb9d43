//! Capture sources.
//!
//! Physical cameras and microphones live outside this crate; they feed a
//! [`Recorder`](crate::Recorder) through its capture callbacks. This module
//! provides a synthetic source for tests, demos and CI.

mod mock;

pub use mock::MockCapture;
