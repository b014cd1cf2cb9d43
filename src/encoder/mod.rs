//! Stateful encoders and the slot protocol used to drive them.
//!
//! A [`Codec`] models a hardware-style encoder: the caller borrows an input
//! slot, fills it, queues it back with a timestamp, then polls for output
//! slots which must be released after their bytes are consumed. The first
//! poll that finds output announces the codec's final output format.
//!
//! [`EncoderAdapter`] owns one codec and exposes only the
//! configure / submit / poll / finish protocol, so a codec can never be
//! fed before it is configured or polled after it is released.
//!
//! ```text
//! submit ──► [input slots] ──► codec ──► [output slots] ──► poll_output
//!               ▲ retry/backoff                                │
//!               └──────────── release after copy ◄─────────────┘
//! ```

mod adapter;
mod software;

pub use adapter::{EncoderAdapter, EncoderOutput, EncoderState};
pub use software::{rle_decode, rle_encode, SoftwareCodec, SoftwareCodecFactory};

use std::sync::Arc;

use crate::chunk::TrackKind;
use crate::config::{AudioFormat, VideoFormat};
use crate::CodecError;

/// Output format target handed to [`Codec::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderParams {
    /// Parameters for a video encoder.
    Video(VideoFormat),
    /// Parameters for an audio encoder.
    Audio(AudioFormat),
}

impl EncoderParams {
    /// The stream kind these parameters describe.
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Video(_) => TrackKind::Video,
            Self::Audio(_) => TrackKind::Audio,
        }
    }
}

/// Opaque description of an encoder's finalized output format.
///
/// Produced once per encoder when its output format becomes available and
/// stored verbatim in the container's track table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor(Arc<[u8]>);

impl FormatDescriptor {
    /// Wraps raw descriptor bytes.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// The raw descriptor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Per-buffer flags exchanged with a codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Marks the last buffer of the stream.
    pub end_of_stream: bool,
    /// Marks an independently decodable unit.
    pub key_frame: bool,
}

impl BufferFlags {
    /// Flags for an end-of-stream buffer.
    pub const END_OF_STREAM: BufferFlags = BufferFlags {
        end_of_stream: true,
        key_frame: false,
    };
}

/// Metadata describing a ready output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Number of valid bytes in the slot.
    pub size: usize,
    /// Presentation timestamp in microseconds.
    pub pts_us: u64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

/// Answer to [`Codec::dequeue_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing is ready yet.
    TryAgainLater,
    /// The output format is now available via [`Codec::output_format`].
    FormatChanged,
    /// Output slot `slot` holds an encoded unit.
    Ready {
        /// Index of the output slot.
        slot: usize,
        /// What the slot holds.
        info: BufferInfo,
    },
}

/// A stateful encoder driven through input and output slots.
///
/// Implementations need not be thread safe beyond `Send`: a codec is owned
/// by exactly one [`EncoderAdapter`], which calls it strictly sequentially.
pub trait Codec: Send {
    /// Applies the output format target. Called once, before [`start`](Self::start).
    fn configure(&mut self, params: &EncoderParams) -> Result<(), CodecError>;

    /// Starts accepting input.
    fn start(&mut self) -> Result<(), CodecError>;

    /// Borrows a free input slot, or `None` if all slots are busy.
    fn dequeue_input_slot(&mut self) -> Result<Option<usize>, CodecError>;

    /// The writable buffer behind a dequeued input slot.
    fn input_buffer(&mut self, slot: usize) -> Option<&mut Vec<u8>>;

    /// Hands a filled input slot back to the codec.
    fn queue_input(
        &mut self,
        slot: usize,
        len: usize,
        pts_us: u64,
        flags: BufferFlags,
    ) -> Result<(), CodecError>;

    /// Polls for output.
    fn dequeue_output(&mut self) -> Result<OutputStatus, CodecError>;

    /// The finalized output format, once [`OutputStatus::FormatChanged`] was reported.
    fn output_format(&self) -> Option<FormatDescriptor>;

    /// The readable buffer behind a ready output slot.
    fn output_buffer(&self, slot: usize) -> Option<&[u8]>;

    /// Returns an output slot to the codec for reuse.
    fn release_output(&mut self, slot: usize) -> Result<(), CodecError>;

    /// Stops processing. Queued data is discarded.
    fn stop(&mut self);

    /// Frees every resource held by the codec.
    fn release(&mut self);
}

/// Creates codecs for each stream kind.
pub trait CodecFactory: Send + Sync {
    /// Creates an unconfigured codec for `kind`.
    fn create(&self, kind: TrackKind) -> Result<Box<dyn Codec>, CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_kind() {
        assert_eq!(
            EncoderParams::Video(VideoFormat::default()).kind(),
            TrackKind::Video
        );
        assert_eq!(
            EncoderParams::Audio(AudioFormat::default()).kind(),
            TrackKind::Audio
        );
    }

    #[test]
    fn test_descriptor_bytes() {
        let descriptor = FormatDescriptor::new(vec![1u8, 2, 3]);
        assert_eq!(descriptor.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_codec_factory_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn CodecFactory>();
    }
}
