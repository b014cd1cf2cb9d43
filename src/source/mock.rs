//! Mock capture source for testing without hardware.

use std::f64::consts::PI;

use crate::chunk::{AudioChunk, VideoFrame};
use crate::config::{AudioFormat, VideoFormat};
use crate::recorder::Recorder;

/// Default duration of one generated audio chunk.
const DEFAULT_AUDIO_CHUNK_US: u64 = 20_000;

/// Generates synthetic, timestamped video frames and PCM audio.
///
/// Frames are 8-bit luma planes with horizontal bands that shift every
/// frame, so they run-length encode well but are not all identical. Audio
/// is 16-bit little-endian PCM, either a sine tone or silence.
///
/// This allows testing the full pipeline without cameras or microphones,
/// making it suitable for CI environments.
///
/// # Example
///
/// ```
/// use av_ring_recorder::source::MockCapture;
/// use av_ring_recorder::{AudioFormat, VideoFormat};
///
/// let mut mock = MockCapture::new(
///     VideoFormat { width: 16, height: 8, ..Default::default() },
///     AudioFormat::default(),
/// );
///
/// let frame = mock.next_video_frame();
/// assert_eq!(frame.len(), 16 * 8);
///
/// let chunk = mock.next_sine_chunk(440.0);
/// assert_eq!(chunk.timestamp_us, 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockCapture {
    video: VideoFormat,
    audio: AudioFormat,
    audio_chunk_us: u64,
    next_video_us: u64,
    next_audio_us: u64,
    frame_index: u64,
    audio_frames_emitted: u64,
}

impl MockCapture {
    /// Creates a mock source starting at timestamp zero on both streams.
    pub fn new(video: VideoFormat, audio: AudioFormat) -> Self {
        Self {
            video,
            audio,
            audio_chunk_us: DEFAULT_AUDIO_CHUNK_US,
            next_video_us: 0,
            next_audio_us: 0,
            frame_index: 0,
            audio_frames_emitted: 0,
        }
    }

    /// Sets the first timestamp of each stream.
    #[must_use]
    pub fn starting_at(mut self, video_us: u64, audio_us: u64) -> Self {
        self.next_video_us = video_us;
        self.next_audio_us = audio_us;
        self
    }

    /// Sets the duration covered by each audio chunk.
    #[must_use]
    pub fn with_audio_chunk_us(mut self, chunk_us: u64) -> Self {
        self.audio_chunk_us = chunk_us.max(1);
        self
    }

    /// Time between consecutive frames.
    pub fn frame_interval_us(&self) -> u64 {
        1_000_000 / u64::from(self.video.frame_rate.max(1))
    }

    /// Timestamp the next video frame will carry.
    pub fn next_video_timestamp(&self) -> u64 {
        self.next_video_us
    }

    /// Timestamp the next audio chunk will carry.
    pub fn next_audio_timestamp(&self) -> u64 {
        self.next_audio_us
    }

    /// Generates the next video frame.
    pub fn next_video_frame(&mut self) -> VideoFrame {
        let width = self.video.width as usize;
        let height = self.video.height as usize;
        let shift = self.frame_index as usize;
        let mut data = Vec::with_capacity(width * height);
        for row in 0..height {
            let luma = (((row + shift) / 4) % 8 * 32) as u8;
            data.extend(std::iter::repeat(luma).take(width));
        }

        let frame = VideoFrame::new(data, self.next_video_us);
        self.frame_index += 1;
        self.next_video_us += self.frame_interval_us();
        frame
    }

    /// Generates the next audio chunk as silence.
    pub fn next_silent_chunk(&mut self) -> AudioChunk {
        let samples = vec![0i16; self.samples_per_chunk()];
        self.emit_audio(&samples)
    }

    /// Generates the next audio chunk as a sine wave at `frequency` Hz.
    ///
    /// Phase continues across chunks.
    pub fn next_sine_chunk(&mut self, frequency: f64) -> AudioChunk {
        let channels = usize::from(self.audio.channels.max(1));
        let frames = self.samples_per_chunk() / channels;
        let sample_rate = f64::from(self.audio.sample_rate.max(1));
        let mut samples = Vec::with_capacity(frames * channels);

        for i in 0..frames as u64 {
            let t = (self.audio_frames_emitted + i) as f64 / sample_rate;
            let sample = ((2.0 * PI * frequency * t).sin() * 32767.0) as i16;
            // same sample on every channel
            samples.extend(std::iter::repeat(sample).take(channels));
        }
        self.emit_audio(&samples)
    }

    /// Feeds `duration_us` of capture into `recorder`, interleaved by timestamp.
    ///
    /// Returns the number of `(video, audio)` samples pushed.
    pub fn feed(&mut self, recorder: &Recorder, duration_us: u64) -> (usize, usize) {
        let end_video = self.next_video_us + duration_us;
        let end_audio = self.next_audio_us + duration_us;
        let (mut frames, mut chunks) = (0, 0);

        loop {
            let video_due = self.next_video_us < end_video;
            let audio_due = self.next_audio_us < end_audio;
            if video_due && (!audio_due || self.next_video_us <= self.next_audio_us) {
                let frame = self.next_video_frame();
                recorder.on_video_frame(frame.data, frame.timestamp_us);
                frames += 1;
            } else if audio_due {
                let chunk = self.next_sine_chunk(440.0);
                recorder.on_audio_chunk(chunk.data, chunk.timestamp_us);
                chunks += 1;
            } else {
                break;
            }
        }
        (frames, chunks)
    }

    fn samples_per_chunk(&self) -> usize {
        let frames = u64::from(self.audio.sample_rate) * self.audio_chunk_us / 1_000_000;
        frames as usize * usize::from(self.audio.channels.max(1))
    }

    fn emit_audio(&mut self, samples: &[i16]) -> AudioChunk {
        let chunk = AudioChunk::from_samples(samples, self.next_audio_us);
        let channels = u64::from(self.audio.channels.max(1));
        self.audio_frames_emitted += samples.len() as u64 / channels;
        self.next_audio_us += self.audio_chunk_us;
        chunk
    }
}
