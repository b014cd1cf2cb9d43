//! Runtime events for monitoring the recorder.
//!
//! Events are non-fatal notifications. The recorder keeps going after any
//! event is emitted; they are for logging and metrics, not error handling.

use std::path::PathBuf;
use std::sync::Arc;

use crate::chunk::TrackKind;
use crate::recorder::{PipelineState, SkipReason};

/// Runtime events emitted by a [`Recorder`](crate::Recorder).
///
/// # Example
///
/// ```
/// use av_ring_recorder::RecorderEvent;
///
/// fn handle_event(event: RecorderEvent) {
///     match event {
///         RecorderEvent::BufferOverflow { kind, evicted_timestamp_us } => {
///             eprintln!("{kind} buffer full, dropped sample at {evicted_timestamp_us}us");
///         }
///         RecorderEvent::SinkError { sink_name, error, attempt } => {
///             eprintln!("sink '{sink_name}' failed (attempt {attempt}): {error}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// The pipeline moved to a new state.
    StateChanged {
        /// State before the transition.
        from: PipelineState,
        /// State after the transition.
        to: PipelineState,
    },

    /// A ring buffer was full and evicted its oldest sample.
    ///
    /// Expected during long captures: the buffer only keeps the most recent
    /// window. Frequent overflows with a short retention window mean the
    /// capacity is too small for the capture rate.
    BufferOverflow {
        /// Stream whose buffer overflowed.
        kind: TrackKind,
        /// Capture timestamp of the evicted sample.
        evicted_timestamp_us: u64,
    },

    /// The periodic prune removed samples older than the retention window.
    SamplesPruned {
        /// Stream that was pruned.
        kind: TrackKind,
        /// Number of samples removed.
        count: usize,
    },

    /// An encoder announced its output format and a track was registered.
    TrackRegistered {
        /// Stream of the new track.
        kind: TrackKind,
        /// Track index in the container.
        index: u16,
    },

    /// A stop found nothing to save.
    SaveSkipped {
        /// Which stream was missing.
        reason: SkipReason,
    },

    /// The container was finalized.
    SaveCompleted {
        /// Path of the finished file.
        path: PathBuf,
        /// Video data records written.
        video_samples: u32,
        /// Audio data records written.
        audio_samples: u32,
    },

    /// An output sink failed to accept a finished recording.
    ///
    /// Delivery is retried with exponential backoff up to
    /// [`SessionConfig::sink_retry_attempts`](crate::SessionConfig::sink_retry_attempts).
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
        /// Which attempt failed, starting at 1.
        attempt: u32,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`RecorderBuilder::on_event()`](crate::RecorderBuilder::on_event).
/// The callback runs on whichever thread raised the event, including
/// capture threads, so keep it short.
pub type EventCallback = Arc<dyn Fn(RecorderEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use av_ring_recorder::{event_callback, RecorderEvent};
///
/// let callback = event_callback(|event: RecorderEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RecorderEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
