//! Configuration types for recording sessions.

use std::time::Duration;

use crate::RecorderError;

/// Output format target for the video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frame rate in frames per second.
    pub frame_rate: u32,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
            bit_rate: 1_000_000,
        }
    }
}

/// Output format target for the audio encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 128_000,
        }
    }
}

/// Sizing of one stream's ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Maximum number of samples held. The oldest is evicted on overflow.
    pub capacity: usize,
    /// Samples older than `now - retention` are pruned periodically.
    ///
    /// `None` disables time-window pruning; only capacity applies.
    pub retention: Option<Duration>,
}

impl BufferConfig {
    /// Ten seconds of video at 30 fps.
    pub const DEFAULT_VIDEO_CAPACITY: usize = 300;

    /// Roughly ten seconds of 1024-frame PCM reads at 44.1 kHz.
    pub const DEFAULT_AUDIO_CAPACITY: usize = 512;

    /// Default retention window for both streams.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10);

    /// Default video buffer: 300 frames, 10 second window.
    pub fn video() -> Self {
        Self {
            capacity: Self::DEFAULT_VIDEO_CAPACITY,
            retention: Some(Self::DEFAULT_RETENTION),
        }
    }

    /// Default audio buffer: 512 chunks, 10 second window.
    pub fn audio() -> Self {
        Self {
            capacity: Self::DEFAULT_AUDIO_CAPACITY,
            retention: Some(Self::DEFAULT_RETENTION),
        }
    }
}

/// Bounded retry policy for encoder slot acquisition and output polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up once this much time has been spent waiting.
    pub timeout: Duration,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Upper bound on the number of attempts this policy allows.
    ///
    /// Always at least one, so a zero timeout still tries once.
    pub fn max_attempts(&self) -> u32 {
        if self.backoff.is_zero() {
            return 1;
        }
        let attempts = self.timeout.as_micros() / self.backoff.as_micros();
        u32::try_from(attempts).unwrap_or(u32::MAX).saturating_add(1)
    }
}

/// Configuration for one recording session.
///
/// Use [`SessionConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use av_ring_recorder::{SessionConfig, VideoFormat};
///
/// let config = SessionConfig {
///     video: VideoFormat { width: 1280, height: 720, ..Default::default() },
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Video encoder target.
    pub video: VideoFormat,
    /// Audio encoder target.
    pub audio: AudioFormat,
    /// Video ring buffer sizing.
    pub video_buffer: BufferConfig,
    /// Audio ring buffer sizing.
    pub audio_buffer: BufferConfig,
    /// How often the time-window prune runs while capturing.
    ///
    /// Default: 1 second
    pub prune_interval: Duration,
    /// Retry policy for encoder input slots and output polling.
    pub retry: RetryPolicy,
    /// Number of delivery attempts per output sink.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,
    /// Initial delay between sink delivery attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt).
    /// Default: 100ms
    pub sink_retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            video: VideoFormat::default(),
            audio: AudioFormat::default(),
            video_buffer: BufferConfig::video(),
            audio_buffer: BufferConfig::audio(),
            prune_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            sink_retry_attempts: 3,
            sink_retry_delay: Duration::from_millis(100),
        }
    }
}

impl SessionConfig {
    /// Checks the configuration for values the pipeline cannot work with.
    ///
    /// Encoder format values are checked by the codec itself at configure
    /// time; this only rejects what would break buffering and scheduling.
    pub fn validate(&self) -> Result<(), RecorderError> {
        for (name, buffer) in [("video", &self.video_buffer), ("audio", &self.audio_buffer)] {
            if buffer.capacity == 0 {
                return Err(RecorderError::invalid_config(format!(
                    "{name} buffer capacity must be at least 1"
                )));
            }
            if buffer.retention.is_some_and(|r| r.is_zero()) {
                return Err(RecorderError::invalid_config(format!(
                    "{name} buffer retention must be non-zero (use None to disable)"
                )));
            }
        }
        if self.prune_interval.is_zero() {
            return Err(RecorderError::invalid_config(
                "prune interval must be non-zero",
            ));
        }
        if self.sink_retry_attempts == 0 {
            return Err(RecorderError::invalid_config(
                "sink retry attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.frame_rate, 30);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.video_buffer.capacity, 300);
        assert_eq!(config.video_buffer.retention, Some(Duration::from_secs(10)));
        assert_eq!(config.prune_interval, Duration::from_secs(1));
        assert_eq!(config.retry.backoff, Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = SessionConfig::default();
        config.audio_buffer.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audio buffer capacity"));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = SessionConfig::default();
        config.video_buffer.retention = Some(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(RecorderError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_retry_policy_attempts() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(100),
            backoff: Duration::from_millis(10),
        };
        assert_eq!(policy.max_attempts(), 11);

        let once = RetryPolicy {
            timeout: Duration::ZERO,
            backoff: Duration::from_millis(10),
        };
        assert_eq!(once.max_attempts(), 1);
    }
}
