//! Bounded, time-aware ring buffer for captured samples.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer as _};
use ringbuf::HeapRb;

use crate::chunk::Timestamped;

/// Result of a [`RingBuffer::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// The sample was stored without evicting anything.
    Stored,
    /// The sample was stored after evicting the returned oldest sample.
    Evicted(T),
    /// The buffer is closed; the sample was not stored.
    Rejected,
}

struct Inner<T> {
    rb: HeapRb<T>,
    closed: bool,
}

/// A bounded circular store for one capture stream.
///
/// The buffer has a single writer (the capture agent) and a single reader
/// (the save pipeline). `push` never waits on the reader: when the buffer
/// is full the oldest sample is evicted before the new one is admitted.
/// An optional retention window lets [`prune`](Self::prune) drop samples
/// that are too old regardless of capacity.
///
/// All access goes through a short critical section, so a reader taking a
/// snapshot never observes a partially written sample.
///
/// # Example
///
/// ```
/// use av_ring_recorder::pipeline::RingBuffer;
/// use av_ring_recorder::VideoFrame;
///
/// let buffer = RingBuffer::new(2);
/// buffer.push(VideoFrame::new(vec![1u8], 0));
/// buffer.push(VideoFrame::new(vec![2u8], 33));
/// buffer.push(VideoFrame::new(vec![3u8], 66)); // evicts the first frame
///
/// let timestamps: Vec<u64> = buffer.snapshot_ordered().map(|f| f.timestamp_us).collect();
/// assert_eq!(timestamps, vec![33, 66]);
/// ```
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    retention: Option<Duration>,
    evicted: AtomicU64,
    pruned: AtomicU64,
}

impl<T: Timestamped + Clone> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`SessionConfig::validate`](crate::SessionConfig::validate)
    /// rejects that before a recorder ever builds a buffer.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Creates a buffer that also drops samples older than `retention`
    /// whenever [`prune`](Self::prune) runs.
    pub fn with_retention(capacity: usize, retention: Duration) -> Self {
        Self::build(capacity, Some(retention))
    }

    fn build(capacity: usize, retention: Option<Duration>) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                rb: HeapRb::new(capacity),
                closed: false,
            }),
            capacity,
            retention,
            evicted: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    /// Stores a sample, evicting the oldest one if the buffer is full.
    ///
    /// Never blocks on the reader and never rejects the newest sample while
    /// the buffer is open.
    pub fn push(&self, sample: T) -> PushOutcome<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Rejected;
        }
        match inner.rb.push_overwrite(sample) {
            Some(oldest) => {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Evicted(oldest)
            }
            None => PushOutcome::Stored,
        }
    }

    /// Returns a one-shot iterator over copies of the held samples, sorted
    /// by ascending timestamp. The buffer keeps its contents.
    ///
    /// Capture jitter can deliver samples slightly out of order, so the
    /// snapshot is sorted rather than trusting insertion order. The sort is
    /// stable: equal timestamps keep their insertion order.
    pub fn snapshot_ordered(&self) -> Snapshot<T> {
        let mut samples: Vec<T> = {
            let inner = self.inner.lock();
            inner.rb.iter().cloned().collect()
        };
        samples.sort_by_key(Timestamped::timestamp_us);
        Snapshot::new(samples)
    }

    /// Removes and returns every held sample, sorted by ascending timestamp.
    pub fn drain_snapshot(&self) -> Snapshot<T> {
        let mut samples: Vec<T> = {
            let mut inner = self.inner.lock();
            let mut taken = Vec::with_capacity(inner.rb.occupied_len());
            while let Some(sample) = inner.rb.try_pop() {
                taken.push(sample);
            }
            taken
        };
        samples.sort_by_key(Timestamped::timestamp_us);
        Snapshot::new(samples)
    }

    /// Empties the buffer and re-opens it for pushes.
    pub fn clear(&self) {
        let removed = {
            let mut inner = self.inner.lock();
            inner.closed = false;
            let mut removed = Vec::with_capacity(inner.rb.occupied_len());
            while let Some(sample) = inner.rb.try_pop() {
                removed.push(sample);
            }
            removed
        };
        self.evicted.store(0, Ordering::Relaxed);
        self.pruned.store(0, Ordering::Relaxed);
        drop(removed);
    }

    /// Stops accepting pushes. Once this returns, no later push is stored.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Returns `true` if the buffer no longer accepts pushes.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Drops every sample older than `now_us - retention`.
    ///
    /// Returns the number of samples removed. Does nothing for buffers
    /// without a retention window.
    pub fn prune(&self, now_us: u64) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let window = u64::try_from(retention.as_micros()).unwrap_or(u64::MAX);
        let threshold = now_us.saturating_sub(window);

        let stale = {
            let mut inner = self.inner.lock();
            let mut stale = Vec::new();

            // Fast path: insertion order is almost always chronological.
            while inner
                .rb
                .iter()
                .next()
                .is_some_and(|s| s.timestamp_us() < threshold)
            {
                if let Some(sample) = inner.rb.try_pop() {
                    stale.push(sample);
                }
            }

            // A jittered sample can sit behind a newer one; rebuild if so.
            if inner.rb.iter().any(|s| s.timestamp_us() < threshold) {
                let mut kept = Vec::with_capacity(inner.rb.occupied_len());
                while let Some(sample) = inner.rb.try_pop() {
                    if sample.timestamp_us() < threshold {
                        stale.push(sample);
                    } else {
                        kept.push(sample);
                    }
                }
                for sample in kept {
                    let _ = inner.rb.push_overwrite(sample);
                }
            }
            stale
        };

        let removed = stale.len();
        if removed > 0 {
            self.pruned.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::trace!(removed, threshold, "pruned samples outside retention window");
        }
        removed
    }

    /// Timestamp of the oldest held sample, if any.
    pub fn oldest_timestamp(&self) -> Option<u64> {
        let inner = self.inner.lock();
        inner.rb.iter().map(Timestamped::timestamp_us).min()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().rb.occupied_len()
    }

    /// Returns `true` if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().rb.is_empty()
    }

    /// Maximum number of samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The retention window, if any.
    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Samples evicted by capacity since the last [`clear`](Self::clear).
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Samples removed by [`prune`](Self::prune) since the last [`clear`](Self::clear).
    pub fn pruned_count(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }
}

/// Ordered, finite, non-restartable sequence of samples taken from a
/// [`RingBuffer`].
#[derive(Debug)]
pub struct Snapshot<T> {
    samples: std::vec::IntoIter<T>,
}

impl<T> Snapshot<T> {
    fn new(samples: Vec<T>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }

    /// Peeks at the next sample without consuming it.
    pub fn peek(&self) -> Option<&T> {
        self.samples.as_slice().first()
    }
}

impl<T> Iterator for Snapshot<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.samples.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.samples.size_hint()
    }
}

impl<T> ExactSizeIterator for Snapshot<T> {}
