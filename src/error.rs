//! Error types for av-ring-recorder.
//!
//! Errors are split into three categories:
//! - **Fatal errors** ([`RecorderError`]): abort the save and tear down every
//!   encoder and the muxer before being returned to the caller
//! - **Protocol/backend errors** ([`EncoderError`], [`MuxerError`]): raised by
//!   the pipeline stages and wrapped into [`RecorderError`]
//! - **Recoverable events**: runtime issues surfaced via [`EventCallback`](crate::EventCallback)
//!
//! Transient conditions (no input slot yet, no output yet) are retried
//! internally and only become errors once the retry budget is exhausted.
//! An empty buffer at stop time is not an error at all, see
//! [`SaveOutcome::Skipped`](crate::SaveOutcome::Skipped).

use std::path::PathBuf;
use std::time::Duration;

use crate::chunk::TrackKind;

/// Fatal errors returned from [`Recorder`](crate::Recorder) operations.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The session or builder configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// The operation is not allowed in the current pipeline state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Name of the state the recorder was in.
        state: &'static str,
    },

    /// The recorder was closed and accepts no further sessions.
    #[error("recorder is closed")]
    Closed,

    /// An encoder failed.
    #[error(transparent)]
    Encoder(#[from] EncoderError),

    /// The muxer failed.
    #[error(transparent)]
    Muxer(#[from] MuxerError),

    /// The background save task panicked or was cancelled.
    #[error("save pipeline task failed: {0}")]
    PipelineTask(String),
}

impl RecorderError {
    /// Creates an invalid configuration error with the given reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Errors raised by an [`EncoderAdapter`](crate::encoder::EncoderAdapter) or
/// the [`Codec`](crate::encoder::Codec) it wraps.
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    /// The codec could not be created or configured for the requested format.
    #[error("{kind} encoder configuration failed: {reason}")]
    Configuration {
        /// Stream the encoder was created for.
        kind: TrackKind,
        /// Why configuration failed.
        reason: String,
    },

    /// No writable input slot became available before the timeout.
    #[error("{kind} encoder: no input slot available after {waited:?} ({attempts} attempts)")]
    InputSlotTimeout {
        /// Stream the encoder belongs to.
        kind: TrackKind,
        /// Total time spent waiting.
        waited: Duration,
        /// Number of acquisition attempts made.
        attempts: u32,
    },

    /// No output became available before the timeout.
    #[error("{kind} encoder: no output available after {waited:?} ({attempts} attempts)")]
    OutputTimeout {
        /// Stream the encoder belongs to.
        kind: TrackKind,
        /// Total time spent waiting.
        waited: Duration,
        /// Number of polls made.
        attempts: u32,
    },

    /// The codec signalled a ready output slot but no buffer could be retrieved.
    #[error("{kind} encoder signalled output slot {slot} ready but returned no buffer")]
    MissingOutputBuffer {
        /// Stream the encoder belongs to.
        kind: TrackKind,
        /// Slot index reported by the codec.
        slot: usize,
    },

    /// The codec handed out an input slot index it has no buffer for.
    #[error("{kind} encoder handed out input slot {slot} without a buffer")]
    MissingInputBuffer {
        /// Stream the encoder belongs to.
        kind: TrackKind,
        /// Slot index reported by the codec.
        slot: usize,
    },

    /// The codec reported a second output format change.
    #[error("{kind} encoder changed its output format more than once")]
    FormatChangedTwice {
        /// Stream the encoder belongs to.
        kind: TrackKind,
    },

    /// The codec produced data before announcing its output format.
    #[error("{kind} encoder produced data before its output format")]
    DataBeforeFormat {
        /// Stream the encoder belongs to.
        kind: TrackKind,
    },

    /// The adapter was used out of order.
    #[error("{kind} encoder: cannot {operation} while {state}")]
    InvalidState {
        /// Stream the encoder belongs to.
        kind: TrackKind,
        /// The rejected operation.
        operation: &'static str,
        /// Name of the adapter state.
        state: &'static str,
    },

    /// Error reported by the codec backend itself.
    #[error("{kind} codec error: {reason}")]
    Codec {
        /// Stream the encoder belongs to.
        kind: TrackKind,
        /// Description of what went wrong.
        reason: String,
    },
}

impl EncoderError {
    /// Creates a configuration error for the given stream.
    pub fn configuration(kind: TrackKind, reason: impl Into<String>) -> Self {
        Self::Configuration {
            kind,
            reason: reason.into(),
        }
    }

    /// Creates a backend error for the given stream.
    pub fn codec(kind: TrackKind, reason: impl Into<String>) -> Self {
        Self::Codec {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors caused by an exhausted retry budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::InputSlotTimeout { .. } | Self::OutputTimeout { .. }
        )
    }

    /// Returns `true` for contract violations between the adapter and its codec.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingOutputBuffer { .. }
                | Self::MissingInputBuffer { .. }
                | Self::FormatChangedTwice { .. }
                | Self::DataBeforeFormat { .. }
                | Self::InvalidState { .. }
        )
    }
}

/// Error reported by a [`Codec`](crate::encoder::Codec) implementation.
///
/// The adapter wraps it into an [`EncoderError`] carrying the stream kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    /// Creates a codec error with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors raised by the [`Muxer`](crate::mux::Muxer).
#[derive(Debug, thiserror::Error)]
pub enum MuxerError {
    /// A track of this kind was already registered.
    #[error("{kind} track already registered")]
    TrackAlreadyRegistered {
        /// The duplicated track kind.
        kind: TrackKind,
    },

    /// `start()` was called before every expected track was registered.
    #[error("cannot start muxer: {kind} track not registered")]
    MissingTrack {
        /// The track kind still missing.
        kind: TrackKind,
    },

    /// `start()` was called twice, or tracks were added after start.
    #[error("muxer already started")]
    AlreadyStarted,

    /// `finalize()` was called before `start()`.
    #[error("muxer not started")]
    NotStarted,

    /// The muxer was already finalized.
    #[error("muxer already finalized")]
    AlreadyFinalized,

    /// `finalize()` was called before a track delivered its end-of-stream chunk.
    #[error("cannot finalize: {kind} track has not reached end of stream")]
    MissingEndOfStream {
        /// The track still open.
        kind: TrackKind,
    },

    /// A chunk referenced a track index that was never registered.
    #[error("unknown track index {index}")]
    UnknownTrack {
        /// The unknown index.
        index: u16,
    },

    /// A chunk's kind does not match the track it was written to.
    #[error("{chunk_kind} chunk written to {track_kind} track {index}")]
    TrackKindMismatch {
        /// The target track index.
        index: u16,
        /// Kind of the target track.
        track_kind: TrackKind,
        /// Kind carried by the chunk.
        chunk_kind: TrackKind,
    },

    /// A chunk went backwards in time within its track.
    #[error("{kind} track timestamp went backwards: {pts_us}us after {last_pts_us}us")]
    NonMonotonicTimestamp {
        /// The track kind.
        kind: TrackKind,
        /// Timestamp of the rejected chunk.
        pts_us: u64,
        /// Last timestamp written to the track.
        last_pts_us: u64,
    },

    /// A chunk arrived after the track's end-of-stream chunk.
    #[error("{kind} track already reached end of stream")]
    WriteAfterEndOfStream {
        /// The track kind.
        kind: TrackKind,
    },

    /// A chunk payload is too large for the container record format.
    #[error("{kind} chunk of {len} bytes exceeds the container record limit")]
    ChunkTooLarge {
        /// The track kind.
        kind: TrackKind,
        /// Payload length.
        len: usize,
    },

    /// Container file I/O error.
    #[error("container file error: {path}: {source}")]
    Io {
        /// Path to the container file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl MuxerError {
    /// Creates an I/O error for the given container path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur within an [`OutputSink`](crate::OutputSink) implementation.
///
/// Sink errors are recoverable - the recorder emits a
/// [`RecorderEvent::SinkError`](crate::RecorderEvent::SinkError) and may retry.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Delivering the recording failed.
    #[error("delivery failed: {reason}")]
    DeliveryFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a delivery failed error with the given reason.
    pub fn delivery_failed(reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_error_display() {
        let err = RecorderError::InvalidState {
            operation: "stop",
            state: "idle",
        };
        assert_eq!(err.to_string(), "cannot stop while idle");
    }

    #[test]
    fn test_encoder_error_wraps_transparently() {
        let err: RecorderError = EncoderError::configuration(TrackKind::Video, "0x0 frame").into();
        assert_eq!(
            err.to_string(),
            "video encoder configuration failed: 0x0 frame"
        );
    }

    #[test]
    fn test_timeout_distinct_from_protocol_violation() {
        let timeout = EncoderError::InputSlotTimeout {
            kind: TrackKind::Audio,
            waited: Duration::from_millis(100),
            attempts: 10,
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_protocol_violation());

        let missing = EncoderError::MissingOutputBuffer {
            kind: TrackKind::Audio,
            slot: 2,
        };
        assert!(missing.is_protocol_violation());
        assert!(!missing.is_timeout());
    }

    #[test]
    fn test_muxer_error_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such dir");
        let err = MuxerError::io("/tmp/out.avrb", io_err);
        assert!(err.to_string().contains("/tmp/out.avrb"));
    }

    #[test]
    fn test_sink_error_custom() {
        let err = SinkError::custom("upload rejected");
        assert_eq!(err.to_string(), "upload rejected");
    }
}
