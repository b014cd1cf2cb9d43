//! Time sources and cross-stream timestamp alignment.
//!
//! Video and audio are stamped by independent capture agents. At save time
//! the recorder performs a single linear alignment: the absolute distance
//! between the first retained video sample and the first retained audio
//! sample is added to every video presentation timestamp, while audio
//! presentation timestamps accumulate the deltas between consecutive audio
//! samples starting from zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of "now" for time-window pruning, in the same monotonic
/// microsecond basis capture collaborators use to stamp samples.
pub trait TimeSource: Send + Sync {
    /// Current time in monotonic microseconds.
    fn now_us(&self) -> u64;
}

/// Monotonic clock measured from its own creation.
///
/// Capture collaborators should stamp samples with [`now_us`](TimeSource::now_us)
/// of the same instance the recorder prunes with.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    epoch: Instant,
}

impl MonotonicTimeSource {
    /// Creates a clock whose zero point is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to. Useful for simulations and tests.
///
/// # Example
///
/// ```
/// use av_ring_recorder::{ManualTimeSource, TimeSource};
/// use std::time::Duration;
///
/// let clock = ManualTimeSource::new(0);
/// clock.advance(Duration::from_millis(5));
/// assert_eq!(clock.now_us(), 5_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Creates a clock reading `start_us`.
    pub fn new(start_us: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_us)),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_us: u64) {
        self.now.store(now_us, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Computes the alignment offset between the first video and first audio
/// timestamps of a session.
///
/// The offset is symmetric: it does not matter which stream started first.
pub fn compute_delta(first_video_ts: u64, first_audio_ts: u64) -> u64 {
    first_video_ts.abs_diff(first_audio_ts)
}

/// Per-session mapping from capture timestamps to presentation timestamps.
#[derive(Debug, Clone)]
pub struct StreamClock {
    first_video_ts: u64,
    delta_us: u64,
    previous_audio_ts: u64,
    audio_pts_us: u64,
}

impl StreamClock {
    /// Aligns a session from the oldest retained sample of each stream.
    pub fn align(first_video_ts: u64, first_audio_ts: u64) -> Self {
        let delta_us = compute_delta(first_video_ts, first_audio_ts);
        tracing::debug!(
            first_video_ts,
            first_audio_ts,
            delta_us,
            "aligned video and audio clocks"
        );
        Self {
            first_video_ts,
            delta_us,
            previous_audio_ts: first_audio_ts,
            audio_pts_us: 0,
        }
    }

    /// The one-time video/audio offset in microseconds.
    pub fn delta_us(&self) -> u64 {
        self.delta_us
    }

    /// Presentation timestamp for a video sample.
    pub fn video_pts(&self, capture_ts: u64) -> u64 {
        capture_ts
            .saturating_sub(self.first_video_ts)
            .saturating_add(self.delta_us)
    }

    /// Presentation timestamp for the next audio sample.
    ///
    /// Must be called in ascending capture order; each call advances the
    /// running audio position by the gap since the previous sample.
    pub fn next_audio_pts(&mut self, capture_ts: u64) -> u64 {
        let step = capture_ts.saturating_sub(self.previous_audio_ts);
        self.previous_audio_ts = self.previous_audio_ts.max(capture_ts);
        self.audio_pts_us = self.audio_pts_us.saturating_add(step);
        self.audio_pts_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delta_symmetric() {
        assert_eq!(compute_delta(1000, 1500), 500);
        assert_eq!(compute_delta(1500, 1000), 500);
        assert_eq!(compute_delta(7, 7), 0);
    }

    #[test]
    fn test_video_pts_offset_by_delta() {
        let clock = StreamClock::align(0, 10_000);
        assert_eq!(clock.delta_us(), 10_000);
        assert_eq!(clock.video_pts(0), 10_000);
        assert_eq!(clock.video_pts(33_000), 43_000);
    }

    #[test]
    fn test_audio_pts_accumulates_consecutive_deltas() {
        let mut clock = StreamClock::align(0, 10_000);
        assert_eq!(clock.next_audio_pts(10_000), 0);
        assert_eq!(clock.next_audio_pts(43_000), 33_000);
        assert_eq!(clock.next_audio_pts(76_000), 66_000);
    }

    #[test]
    fn test_audio_pts_never_goes_backwards() {
        let mut clock = StreamClock::align(0, 100);
        assert_eq!(clock.next_audio_pts(200), 100);
        // late delivery of an older sample does not rewind the position
        assert_eq!(clock.next_audio_pts(150), 100);
        assert_eq!(clock.next_audio_pts(300), 200);
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::new(100);
        let shared = clock.clone();
        shared.advance(Duration::from_micros(50));
        assert_eq!(clock.now_us(), 150);
        clock.set(10);
        assert_eq!(shared.now_us(), 10);
    }

    #[test]
    fn test_monotonic_time_source_advances() {
        let clock = MonotonicTimeSource::new();
        let a = clock.now_us();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now_us() > a);
    }
}
