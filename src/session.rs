//! Recorder statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of recorder counters.
///
/// Capture counters reset when a session starts; save counters accumulate
/// over the recorder's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Video frames accepted into the ring buffer this session.
    pub video_frames_captured: u64,
    /// Audio chunks accepted into the ring buffer this session.
    pub audio_chunks_captured: u64,
    /// Samples ignored because the recorder was not capturing.
    pub samples_rejected: u64,
    /// Samples evicted because a ring buffer was full.
    pub buffer_overflows: u64,
    /// Samples removed by the retention prune.
    pub samples_pruned: u64,
    /// Containers finalized.
    pub saves_completed: u64,
    /// Stops that found nothing to save.
    pub saves_skipped: u64,
    /// Saves aborted by a fatal error.
    pub saves_failed: u64,
}

/// Lock-free counters shared between the recorder, capture threads and the
/// prune task.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub video_frames_captured: AtomicU64,
    pub audio_chunks_captured: AtomicU64,
    pub samples_rejected: AtomicU64,
    pub buffer_overflows: AtomicU64,
    pub samples_pruned: AtomicU64,
    pub saves_completed: AtomicU64,
    pub saves_skipped: AtomicU64,
    pub saves_failed: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Clears the per-session capture counters.
    pub fn reset_capture(&self) {
        for counter in [
            &self.video_frames_captured,
            &self.audio_chunks_captured,
            &self.samples_rejected,
            &self.buffer_overflows,
            &self.samples_pruned,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            video_frames_captured: self.video_frames_captured.load(Ordering::Relaxed),
            audio_chunks_captured: self.audio_chunks_captured.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
            samples_pruned: self.samples_pruned.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
            saves_skipped: self.saves_skipped.load(Ordering::Relaxed),
            saves_failed: self.saves_failed.load(Ordering::Relaxed),
        }
    }
}
