//! The recorder: capture ingest, session state and the stop-time save.
//!
//! ```text
//!            start              stop                 all samples submitted
//!   Idle ─────────► Capturing ───────► Draining ───────────────────────► Finalizing
//!    ▲                                    │ nothing to save                  │
//!    └────────────────────────────────────┴──────────────────────────────────┘
//!                         close (from anywhere) ─► Closed
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::chunk::{AudioChunk, Timestamped, TrackKind, VideoFrame};
use crate::clock::TimeSource;
use crate::config::SessionConfig;
use crate::encoder::CodecFactory;
use crate::pipeline::{PushOutcome, RingBuffer, SaveJob, SaveObserver, SinkRouter};
use crate::session::{SessionStats, StatsCounters};
use crate::sink::OutputSink;
use crate::{EventCallback, RecorderBuilder, RecorderError, RecorderEvent};

/// Lifecycle state of a [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// No session. Capture callbacks are ignored.
    Idle,
    /// Samples are being buffered.
    Capturing,
    /// Capture halted, buffers are being encoded.
    Draining,
    /// Encoders are flushing and the container is being finalized.
    Finalizing,
    /// Terminal. The recorder accepts no further sessions.
    Closed,
}

impl PipelineState {
    /// Lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stop produced no file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The video buffer was empty.
    NoVideo,
    /// The audio buffer was empty.
    NoAudio,
    /// Both buffers were empty.
    NoData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoVideo => "no video captured",
            Self::NoAudio => "no audio captured",
            Self::NoData => "nothing captured",
        })
    }
}

/// A finalized container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRecording {
    /// Where the file was written.
    pub path: PathBuf,
    /// Video data records in the file.
    pub video_samples: u32,
    /// Audio data records in the file.
    pub audio_samples: u32,
    /// Offset applied between the first video and first audio sample.
    pub delta_us: u64,
}

/// Result of [`Recorder::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A container was written.
    Saved(SavedRecording),
    /// Nothing was written. This is not an error.
    Skipped(SkipReason),
}

impl SaveOutcome {
    /// The saved recording, if any.
    pub fn recording(&self) -> Option<&SavedRecording> {
        match self {
            Self::Saved(recording) => Some(recording),
            Self::Skipped(_) => None,
        }
    }

    /// Returns `true` if a container was written.
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved(_))
    }
}

/// The two capture buffers of the current session.
struct Buffers {
    video: Arc<RingBuffer<VideoFrame>>,
    audio: Arc<RingBuffer<AudioChunk>>,
}

impl Buffers {
    fn closed() -> Self {
        let buffers = Self::for_config(&SessionConfig::default());
        buffers.close();
        buffers
    }

    fn for_config(config: &SessionConfig) -> Self {
        fn build<T: Timestamped + Clone>(capacity: usize, retention: Option<Duration>) -> RingBuffer<T> {
            match retention {
                Some(window) => RingBuffer::with_retention(capacity, window),
                None => RingBuffer::new(capacity),
            }
        }
        Self {
            video: Arc::new(build(config.video_buffer.capacity, config.video_buffer.retention)),
            audio: Arc::new(build(config.audio_buffer.capacity, config.audio_buffer.retention)),
        }
    }

    fn close(&self) {
        self.video.close();
        self.audio.close();
    }
}

/// State shared with capture threads, the prune task and the save job.
struct Shared {
    state: Mutex<PipelineState>,
    buffers: RwLock<Buffers>,
    stats: StatsCounters,
    event_callback: Option<EventCallback>,
}

impl Shared {
    fn emit(&self, event: RecorderEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Moves to `to` if the current state is one of `from`.
    fn transition(
        &self,
        operation: &'static str,
        from: &[PipelineState],
        to: PipelineState,
    ) -> Result<(), RecorderError> {
        let previous = {
            let mut state = self.state.lock();
            if *state == PipelineState::Closed {
                return Err(RecorderError::Closed);
            }
            if !from.contains(&state) {
                return Err(RecorderError::InvalidState {
                    operation,
                    state: state.as_str(),
                });
            }
            std::mem::replace(&mut *state, to)
        };
        self.announce(previous, to);
        Ok(())
    }

    /// Moves to `to` unless the recorder was closed in the meantime.
    fn settle(&self, to: PipelineState) {
        let previous = {
            let mut state = self.state.lock();
            if *state == PipelineState::Closed || *state == to {
                return;
            }
            std::mem::replace(&mut *state, to)
        };
        self.announce(previous, to);
    }

    fn announce(&self, from: PipelineState, to: PipelineState) {
        tracing::debug!(%from, %to, "recorder state changed");
        self.emit(RecorderEvent::StateChanged { from, to });
    }

    fn record_push<T: Timestamped>(&self, kind: TrackKind, outcome: PushOutcome<T>) {
        let captured = match kind {
            TrackKind::Video => &self.stats.video_frames_captured,
            TrackKind::Audio => &self.stats.audio_chunks_captured,
        };
        match outcome {
            PushOutcome::Stored => StatsCounters::incr(captured),
            PushOutcome::Evicted(old) => {
                StatsCounters::incr(captured);
                StatsCounters::incr(&self.stats.buffer_overflows);
                let evicted_timestamp_us = old.timestamp_us();
                tracing::trace!(%kind, evicted_timestamp_us, "ring buffer full, evicted oldest");
                self.emit(RecorderEvent::BufferOverflow {
                    kind,
                    evicted_timestamp_us,
                });
            }
            PushOutcome::Rejected => StatsCounters::incr(&self.stats.samples_rejected),
        }
    }

    fn prune(&self, now_us: u64) -> usize {
        let (video, audio) = {
            let buffers = self.buffers.read();
            (Arc::clone(&buffers.video), Arc::clone(&buffers.audio))
        };
        let mut total = 0;
        for (kind, count) in [
            (TrackKind::Video, video.prune(now_us)),
            (TrackKind::Audio, audio.prune(now_us)),
        ] {
            if count > 0 {
                tracing::debug!(%kind, count, now_us, "pruned samples outside retention window");
                StatsCounters::add(&self.stats.samples_pruned, count as u64);
                self.emit(RecorderEvent::SamplesPruned { kind, count });
                total += count;
            }
        }
        total
    }
}

impl SaveObserver for Shared {
    fn on_finalizing(&self) {
        self.settle(PipelineState::Finalizing);
    }

    fn on_track_registered(&self, kind: TrackKind, index: u16) {
        self.emit(RecorderEvent::TrackRegistered { kind, index });
    }
}

/// The running session's configuration and background task.
struct ActiveSession {
    config: SessionConfig,
    prune_task: JoinHandle<()>,
}

/// Buffers capture continuously and writes the buffered window to a
/// container file on [`stop`](Recorder::stop).
///
/// Capture callbacks ([`on_video_frame`](Recorder::on_video_frame),
/// [`on_audio_chunk`](Recorder::on_audio_chunk)) may be called from any
/// thread and never wait on encoding.
///
/// # Example
///
/// ```no_run
/// use av_ring_recorder::{Recorder, SaveOutcome, SessionConfig};
///
/// # async fn run() -> Result<(), av_ring_recorder::RecorderError> {
/// let recorder = Recorder::builder().output_path("clip.avrb").build()?;
/// recorder.start(SessionConfig::default()).await?;
///
/// // from capture threads:
/// recorder.on_video_frame(vec![0u8; 64], recorder.now_us());
/// recorder.on_audio_chunk(vec![0u8; 32], recorder.now_us());
///
/// match recorder.stop().await? {
///     SaveOutcome::Saved(recording) => println!("wrote {}", recording.path.display()),
///     SaveOutcome::Skipped(reason) => println!("skipped: {reason}"),
/// }
/// # Ok(())
/// # }
/// ```
pub struct Recorder {
    shared: Arc<Shared>,
    output_path: PathBuf,
    router: SinkRouterFactory,
    codec_factory: Arc<dyn CodecFactory>,
    time_source: Arc<dyn TimeSource>,
    session: Mutex<Option<ActiveSession>>,
}

/// Sinks are fixed at build time; retry settings come from each session.
struct SinkRouterFactory {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl SinkRouterFactory {
    fn router(&self, config: &SessionConfig, callback: Option<EventCallback>) -> SinkRouter {
        SinkRouter::new(
            self.sinks.clone(),
            config.sink_retry_attempts,
            config.sink_retry_delay,
        )
        .with_event_callback(callback)
    }
}

impl Recorder {
    /// Creates a new builder.
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::new()
    }

    pub(crate) fn new(
        output_path: PathBuf,
        sinks: Vec<Arc<dyn OutputSink>>,
        event_callback: Option<EventCallback>,
        codec_factory: Arc<dyn CodecFactory>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PipelineState::Idle),
                buffers: RwLock::new(Buffers::closed()),
                stats: StatsCounters::default(),
                event_callback,
            }),
            output_path,
            router: SinkRouterFactory { sinks },
            codec_factory,
            time_source,
            session: Mutex::new(None),
        }
    }

    /// Where containers are written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    /// Returns `true` while capture callbacks are being buffered.
    pub fn is_capturing(&self) -> bool {
        self.state() == PipelineState::Capturing
    }

    /// Current counters.
    pub fn stats(&self) -> SessionStats {
        self.shared.stats.snapshot()
    }

    /// Current time on the recorder's clock, in microseconds.
    ///
    /// Capture collaborators should stamp samples with this clock so the
    /// retention prune compares like with like.
    pub fn now_us(&self) -> u64 {
        self.time_source.now_us()
    }

    /// Number of buffered `(video, audio)` samples.
    pub fn buffered(&self) -> (usize, usize) {
        let buffers = self.shared.buffers.read();
        (buffers.video.len(), buffers.audio.len())
    }

    /// Starts a capture session.
    ///
    /// Fresh, empty ring buffers are sized from `config` and the retention
    /// prune is scheduled every [`SessionConfig::prune_interval`]. Must be
    /// called from within a tokio runtime.
    pub async fn start(&self, config: SessionConfig) -> Result<(), RecorderError> {
        config.validate()?;
        self.shared
            .transition("start", &[PipelineState::Idle], PipelineState::Capturing)?;

        self.shared.stats.reset_capture();
        *self.shared.buffers.write() = Buffers::for_config(&config);

        let prune_task = spawn_prune_task(
            Arc::clone(&self.shared),
            Arc::clone(&self.time_source),
            config.prune_interval,
        );
        if let Some(previous) = self.session.lock().replace(ActiveSession { config: config.clone(), prune_task }) {
            previous.prune_task.abort();
        }

        tracing::info!(
            video_capacity = config.video_buffer.capacity,
            audio_capacity = config.audio_buffer.capacity,
            retention = ?config.video_buffer.retention,
            "capture started"
        );
        Ok(())
    }

    /// Buffers one video frame. Never blocks on encoding.
    ///
    /// Ignored unless the recorder is capturing.
    pub fn on_video_frame(&self, data: impl Into<Arc<[u8]>>, timestamp_us: u64) {
        let buffer = Arc::clone(&self.shared.buffers.read().video);
        let outcome = buffer.push(VideoFrame::new(data, timestamp_us));
        self.shared.record_push(TrackKind::Video, outcome);
    }

    /// Buffers one chunk of little-endian 16-bit PCM. Never blocks on encoding.
    ///
    /// Ignored unless the recorder is capturing.
    pub fn on_audio_chunk(&self, data: impl Into<Arc<[u8]>>, timestamp_us: u64) {
        let buffer = Arc::clone(&self.shared.buffers.read().audio);
        let outcome = buffer.push(AudioChunk::new(data, timestamp_us));
        self.shared.record_push(TrackKind::Audio, outcome);
    }

    /// Runs the retention prune immediately. Returns the number of samples removed.
    pub fn prune_now(&self) -> usize {
        self.shared.prune(self.time_source.now_us())
    }

    /// Halts capture and writes the buffered window to the output path.
    ///
    /// Returns [`SaveOutcome::Skipped`] if either stream has no samples.
    /// On a fatal error both encoders are released, the partial file is
    /// removed and the recorder returns to idle. A recording already at the
    /// output path is only replaced by a save that succeeds.
    pub async fn stop(&self) -> Result<SaveOutcome, RecorderError> {
        self.shared
            .transition("stop", &[PipelineState::Capturing], PipelineState::Draining)?;

        let config = match self.session.lock().take() {
            Some(session) => {
                session.prune_task.abort();
                session.config
            }
            None => SessionConfig::default(),
        };

        let (video, audio) = {
            let buffers = self.shared.buffers.read();
            // closing under the buffer locks means no push lands after this
            buffers.close();
            (buffers.video.drain_snapshot(), buffers.audio.drain_snapshot())
        };

        let skip = match (video.len(), audio.len()) {
            (0, 0) => Some(SkipReason::NoData),
            (0, _) => Some(SkipReason::NoVideo),
            (_, 0) => Some(SkipReason::NoAudio),
            _ => None,
        };
        if let Some(reason) = skip {
            tracing::info!(%reason, "nothing to save");
            StatsCounters::incr(&self.shared.stats.saves_skipped);
            self.shared.emit(RecorderEvent::SaveSkipped { reason });
            self.shared.settle(PipelineState::Idle);
            return Ok(SaveOutcome::Skipped(reason));
        }

        tracing::info!(
            video_samples = video.len(),
            audio_samples = audio.len(),
            path = %self.output_path.display(),
            "saving buffered capture"
        );
        let job = SaveJob {
            path: self.output_path.clone(),
            video,
            audio,
            config: config.clone(),
            factory: Arc::clone(&self.codec_factory),
            observer: Arc::clone(&self.shared) as Arc<dyn SaveObserver>,
        };
        let result = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| RecorderError::PipelineTask(e.to_string()))
            .and_then(|result| result);

        let recording = match result {
            Ok(recording) => recording,
            Err(e) => {
                tracing::error!(error = %e, "save failed");
                StatsCounters::incr(&self.shared.stats.saves_failed);
                self.shared.settle(PipelineState::Idle);
                return Err(e);
            }
        };

        let report = self
            .router
            .router(&config, self.shared.event_callback.clone())
            .deliver(&recording)
            .await;
        if !report.failed.is_empty() {
            tracing::warn!(failed = ?report.failed, "some sinks did not accept the recording");
        }

        StatsCounters::incr(&self.shared.stats.saves_completed);
        self.shared.emit(RecorderEvent::SaveCompleted {
            path: recording.path.clone(),
            video_samples: recording.video_samples,
            audio_samples: recording.audio_samples,
        });
        self.shared.settle(PipelineState::Idle);
        Ok(SaveOutcome::Saved(recording))
    }

    /// Closes the recorder without saving. Idempotent.
    ///
    /// A save already running finishes, but the recorder stays closed.
    pub fn close(&self) {
        let previous = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut *state, PipelineState::Closed)
        };
        if previous == PipelineState::Closed {
            return;
        }
        if let Some(session) = self.session.lock().take() {
            session.prune_task.abort();
        }
        self.shared.buffers.read().close();
        tracing::info!(from = %previous, "recorder closed");
        self.shared.announce(previous, PipelineState::Closed);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.prune_task.abort();
        }
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("output_path", &self.output_path)
            .field("state", &self.state())
            .field("sinks", &self.router.sinks.len())
            .finish_non_exhaustive()
    }
}

fn spawn_prune_task(
    shared: Arc<Shared>,
    time_source: Arc<dyn TimeSource>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            shared.prune(time_source.now_us());
        }
    })
}
