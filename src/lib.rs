//! # av-ring-recorder
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Rolling audio/video capture with save-on-demand.
//!
//! `av-ring-recorder` keeps the most recent window of video frames and audio
//! chunks in bounded ring buffers. When you stop, it aligns the two streams,
//! runs each through a stateful encoder and interleaves the output into a
//! single timestamp-ordered container file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use av_ring_recorder::{ChannelSink, Recorder, SaveOutcome, SessionConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), av_ring_recorder::RecorderError> {
//! let (tx, _rx) = mpsc::channel(4);
//!
//! let recorder = Recorder::builder()
//!     .output_path("last-ten-seconds.avrb")
//!     .add_sink(ChannelSink::new(tx))
//!     .on_event(|e| tracing::debug!(?e, "recorder event"))
//!     .build()?;
//!
//! recorder.start(SessionConfig::default()).await?;
//!
//! // Camera and microphone callbacks, from any thread:
//! recorder.on_video_frame(vec![0u8; 640 * 480], recorder.now_us());
//! recorder.on_audio_chunk(vec![0u8; 1764], recorder.now_us());
//!
//! if let SaveOutcome::Saved(recording) = recorder.stop().await? {
//!     println!("saved {} video frames", recording.video_samples);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict boundary between capture and saving:
//!
//! - **Capture threads**: push into per-stream ring buffers and never wait
//!   on encoding; a full buffer drops its oldest sample
//! - **Prune task**: a tokio interval drops samples older than the retention window
//! - **Save job**: on stop, runs on the blocking pool; encoders are driven
//!   through a bounded retry protocol and a muxer writes the container
//! - **Sinks**: are told about each finished file, with retry

#![warn(missing_docs)]
// Media code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod chunk;
pub mod clock;
mod config;
pub mod encoder;
mod error;
mod event;
pub mod mux;
pub mod pipeline;
mod recorder;
mod session;
mod sink;
pub mod source;

pub use builder::RecorderBuilder;
pub use chunk::{AudioChunk, EncodedChunk, MediaSample, Timestamped, TrackKind, VideoFrame};
pub use clock::{compute_delta, ManualTimeSource, MonotonicTimeSource, StreamClock, TimeSource};
pub use config::{AudioFormat, BufferConfig, RetryPolicy, SessionConfig, VideoFormat};
pub use encoder::{EncoderAdapter, EncoderOutput, EncoderState, SoftwareCodecFactory};
pub use error::{CodecError, EncoderError, MuxerError, RecorderError, SinkError};
pub use event::{event_callback, EventCallback, RecorderEvent};
pub use mux::container::{read_container, ContainerFile};
pub use mux::{MuxSummary, Muxer};
pub use recorder::{PipelineState, Recorder, SaveOutcome, SavedRecording, SkipReason};
pub use session::SessionStats;
pub use sink::{ChannelSink, OutputSink};
