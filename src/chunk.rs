//! Raw capture samples and encoded chunks.

use std::fmt;
use std::sync::Arc;

/// The two kinds of stream a recording session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    /// Raw video frames.
    Video,
    /// Raw PCM audio.
    Audio,
}

impl TrackKind {
    /// Both kinds, in the order tracks are expected by the muxer.
    pub const ALL: [TrackKind; 2] = [TrackKind::Video, TrackKind::Audio];

    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything carrying a capture timestamp in monotonic microseconds.
pub trait Timestamped {
    /// Capture timestamp in microseconds.
    fn timestamp_us(&self) -> u64;
}

/// A captured sample whose payload can be handed to an encoder.
pub trait MediaSample: Timestamped + Clone + Send + Sync + 'static {
    /// The stream this sample belongs to.
    const KIND: TrackKind;

    /// Raw payload bytes.
    fn payload(&self) -> &[u8];
}

/// A raw video frame delivered by a capture collaborator.
///
/// The payload is shared, so cloning a frame (for example when taking a
/// buffer snapshot) does not copy pixel data.
///
/// # Example
///
/// ```
/// use av_ring_recorder::VideoFrame;
///
/// let frame = VideoFrame::new(vec![0u8; 640 * 480 * 3 / 2], 33_000);
/// assert_eq!(frame.len(), 460_800);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Raw pixel payload (for example YUV 4:2:0).
    pub data: Arc<[u8]>,
    /// Capture timestamp in monotonic microseconds.
    pub timestamp_us: u64,
}

impl VideoFrame {
    /// Creates a frame from a payload and capture timestamp.
    pub fn new(data: impl Into<Arc<[u8]>>, timestamp_us: u64) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the frame has no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Timestamped for VideoFrame {
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

impl MediaSample for VideoFrame {
    const KIND: TrackKind = TrackKind::Video;

    fn payload(&self) -> &[u8] {
        &self.data
    }
}

/// A raw chunk of 16-bit little-endian PCM delivered by a capture collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Interleaved PCM bytes (s16le).
    pub data: Arc<[u8]>,
    /// Capture timestamp in monotonic microseconds.
    pub timestamp_us: u64,
}

impl AudioChunk {
    /// Creates a chunk from raw PCM bytes and a capture timestamp.
    pub fn new(data: impl Into<Arc<[u8]>>, timestamp_us: u64) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
        }
    }

    /// Creates a chunk from 16-bit samples, encoding them little-endian.
    pub fn from_samples(samples: &[i16], timestamp_us: u64) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(bytes, timestamp_us)
    }

    /// Number of 16-bit samples in this chunk (across all channels).
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Returns `true` if this chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Timestamped for AudioChunk {
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

impl MediaSample for AudioChunk {
    const KIND: TrackKind = TrackKind::Audio;

    fn payload(&self) -> &[u8] {
        &self.data
    }
}

/// One unit of encoder output, ready to be written to the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Encoded payload (empty for a bare end-of-stream marker).
    pub data: Arc<[u8]>,
    /// Presentation timestamp in microseconds.
    pub pts_us: u64,
    /// `true` for the final chunk an encoder emits.
    pub end_of_stream: bool,
    /// `true` if this chunk can be decoded independently.
    pub key_frame: bool,
    /// Stream this chunk belongs to.
    pub kind: TrackKind,
}

impl EncodedChunk {
    /// Creates a regular data chunk.
    pub fn new(kind: TrackKind, data: impl Into<Arc<[u8]>>, pts_us: u64) -> Self {
        Self {
            data: data.into(),
            pts_us,
            end_of_stream: false,
            key_frame: false,
            kind,
        }
    }

    /// Creates an empty end-of-stream marker.
    pub fn end_of_stream(kind: TrackKind, pts_us: u64) -> Self {
        Self {
            data: Arc::from(Vec::new()),
            pts_us,
            end_of_stream: true,
            key_frame: false,
            kind,
        }
    }

    /// Marks this chunk as a key frame.
    #[must_use]
    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }
}

impl Timestamped for EncodedChunk {
    fn timestamp_us(&self) -> u64 {
        self.pts_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind_display() {
        assert_eq!(TrackKind::Video.to_string(), "video");
        assert_eq!(TrackKind::Audio.to_string(), "audio");
    }

    #[test]
    fn test_audio_chunk_from_samples() {
        let chunk = AudioChunk::from_samples(&[0x1234, -1], 10);
        assert_eq!(&chunk.data[..], &[0x34, 0x12, 0xff, 0xff]);
        assert_eq!(chunk.sample_count(), 2);
        assert_eq!(chunk.timestamp_us(), 10);
    }

    #[test]
    fn test_frame_clone_shares_payload() {
        let frame = VideoFrame::new(vec![1u8, 2, 3], 0);
        let clone = frame.clone();
        assert!(Arc::ptr_eq(&frame.data, &clone.data));
    }

    #[test]
    fn test_end_of_stream_marker() {
        let chunk = EncodedChunk::end_of_stream(TrackKind::Audio, 42);
        assert!(chunk.end_of_stream);
        assert!(chunk.data.is_empty());
        assert_eq!(chunk.pts_us, 42);
    }

    #[test]
    fn test_media_sample_kinds() {
        assert_eq!(<VideoFrame as MediaSample>::KIND, TrackKind::Video);
        assert_eq!(<AudioChunk as MediaSample>::KIND, TrackKind::Audio);
    }
}
