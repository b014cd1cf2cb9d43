//! Capture buffering and save-time plumbing.
//!
//! ```text
//! capture threads → RingBuffer (video) ─┐
//!                                       ├─ stop → snapshot → encoders → muxer → SinkRouter
//! capture threads → RingBuffer (audio) ─┘
//! ```
//!
//! - **Ring Buffer**: bounded, drop-oldest, time-window pruned; a push never
//!   waits on the save path
//! - **Retry**: bounded waits for encoder slots and output
//! - **Save**: the blocking encode and mux job run at stop
//! - **Router**: fans finished recordings out to sinks with retry logic

mod retry;
mod ring_buffer;
mod router;
mod save;

pub(crate) use retry::retry_blocking;
pub use ring_buffer::{PushOutcome, RingBuffer, Snapshot};
pub(crate) use router::SinkRouter;
pub(crate) use save::{SaveJob, SaveObserver};
