//! Destinations for finished recordings.
//!
//! An [`OutputSink`] is told about every container the recorder finalizes.
//! The crate provides [`ChannelSink`], which forwards recordings to a tokio
//! mpsc channel. Implement the trait for uploads, gallery imports or
//! anything else that should happen once a file is complete.

mod channel;

pub use channel::ChannelSink;

use crate::recorder::SavedRecording;
use crate::SinkError;
use async_trait::async_trait;

/// A consumer of finished container files.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability if needed
/// - `on_saved` runs on the tokio runtime after the file is closed
/// - Errors are recoverable: the recorder emits
///   [`RecorderEvent::SinkError`](crate::RecorderEvent::SinkError) and retries
///   with exponential backoff, so delivery should be idempotent
///
/// # Example
///
/// ```
/// use av_ring_recorder::{OutputSink, SavedRecording, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink;
///
/// #[async_trait]
/// impl OutputSink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn on_saved(&self, recording: &SavedRecording) -> Result<(), SinkError> {
///         println!("saved {}", recording.path.display());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Accepts a finalized recording.
    async fn on_saved(&self, recording: &SavedRecording) -> Result<(), SinkError>;
}
