//! The blocking save pipeline: snapshots → encoders → muxer.
//!
//! Runs on tokio's blocking pool. Both adapters are owned by this job and
//! used strictly sequentially, so no codec is ever touched concurrently.
//! On any error the adapters are dropped (which releases their codecs) and
//! the muxer is aborted, removing the partial file.
//!
//! While an encoder has no free input slot the job keeps moving its ready
//! output into the muxer, so a codec that only frees input once its output
//! is consumed cannot stall a save.

use std::path::PathBuf;
use std::sync::Arc;

use crate::chunk::{AudioChunk, MediaSample, Timestamped, TrackKind, VideoFrame};
use crate::clock::StreamClock;
use crate::config::SessionConfig;
use crate::encoder::{CodecFactory, EncoderAdapter, EncoderOutput, EncoderParams};
use crate::error::EncoderError;
use crate::mux::Muxer;
use crate::pipeline::Snapshot;
use crate::recorder::SavedRecording;
use crate::RecorderError;

/// Hooks the save job reports progress through.
pub(crate) trait SaveObserver: Send + Sync {
    /// Called once every sample was submitted, before end of stream.
    fn on_finalizing(&self);

    /// Called when a track is registered in the container.
    fn on_track_registered(&self, kind: TrackKind, index: u16);
}

pub(crate) struct SaveJob {
    pub path: PathBuf,
    pub video: Snapshot<VideoFrame>,
    pub audio: Snapshot<AudioChunk>,
    pub config: SessionConfig,
    pub factory: Arc<dyn CodecFactory>,
    pub observer: Arc<dyn SaveObserver>,
}

/// Track indices assigned by the muxer, by kind.
#[derive(Debug, Default)]
struct TrackTable {
    video: Option<u16>,
    audio: Option<u16>,
}

impl TrackTable {
    fn get(&self, kind: TrackKind) -> Option<u16> {
        match kind {
            TrackKind::Video => self.video,
            TrackKind::Audio => self.audio,
        }
    }

    fn slot(&mut self, kind: TrackKind) -> &mut Option<u16> {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        }
    }
}

impl SaveJob {
    /// Runs the whole pipeline. Both snapshots must be non-empty.
    pub fn run(self) -> Result<SavedRecording, RecorderError> {
        let mut muxer = Muxer::create(&self.path)?;
        match self.encode_into(&mut muxer) {
            Ok(recording) => Ok(recording),
            Err(e) => {
                muxer.abort();
                Err(e)
            }
        }
    }

    fn encode_into(self, muxer: &mut Muxer) -> Result<SavedRecording, RecorderError> {
        let SaveJob {
            path,
            mut video,
            mut audio,
            config,
            factory,
            observer,
        } = self;

        let (Some(first_video), Some(first_audio)) = (
            video.peek().map(|f| f.timestamp_us()),
            audio.peek().map(|c| c.timestamp_us()),
        ) else {
            return Err(RecorderError::invalid_config(
                "save requires samples on both streams",
            ));
        };
        let mut clock = StreamClock::align(first_video, first_audio);

        let mut video_encoder = encoder_for::<VideoFrame>(
            Arc::clone(&factory),
            &config,
            EncoderParams::Video(config.video),
        )?;
        let mut audio_encoder =
            encoder_for::<AudioChunk>(factory, &config, EncoderParams::Audio(config.audio))?;

        let mut tracks = TrackTable::default();
        let mut next_video = video.next().map(|f| (clock.video_pts(f.timestamp_us()), f));
        let mut next_audio = audio.next().map(|c| (clock.next_audio_pts(c.timestamp_us()), c));

        // ties go to video so a frame and the audio under it share a position
        loop {
            let take_video = match (&next_video, &next_audio) {
                (Some((video_pts, _)), Some((audio_pts, _))) => video_pts <= audio_pts,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_video {
                if let Some((pts, frame)) = next_video.take() {
                    submit(&mut video_encoder, &frame, pts, muxer, &mut tracks, observer.as_ref())?;
                }
                next_video = video.next().map(|f| (clock.video_pts(f.timestamp_us()), f));
            } else {
                if let Some((pts, chunk)) = next_audio.take() {
                    submit(&mut audio_encoder, &chunk, pts, muxer, &mut tracks, observer.as_ref())?;
                }
                next_audio = audio.next().map(|c| (clock.next_audio_pts(c.timestamp_us()), c));
            }
        }

        observer.on_finalizing();
        for encoder in [&mut video_encoder, &mut audio_encoder] {
            let kind = encoder.kind();
            encoder.finish_draining(|output| {
                route(kind, output, muxer, &mut tracks, observer.as_ref())
            })?;
            for output in encoder.drain_to_end()? {
                route(encoder.kind(), output, muxer, &mut tracks, observer.as_ref())?;
            }
        }

        let summary = muxer.finalize()?;
        Ok(SavedRecording {
            path,
            video_samples: summary.samples(TrackKind::Video),
            audio_samples: summary.samples(TrackKind::Audio),
            delta_us: clock.delta_us(),
        })
    }
}

/// Creates and configures the adapter for samples of type `T`.
fn encoder_for<T: MediaSample>(
    factory: Arc<dyn CodecFactory>,
    config: &SessionConfig,
    params: EncoderParams,
) -> Result<EncoderAdapter, EncoderError> {
    let mut encoder = EncoderAdapter::new(T::KIND, factory, config.retry);
    encoder.configure(&params)?;
    Ok(encoder)
}

/// Submits one sample, draining output into the muxer while the encoder
/// has no free input slot, then pumps whatever became ready.
fn submit<T: MediaSample>(
    encoder: &mut EncoderAdapter,
    sample: &T,
    pts_us: u64,
    muxer: &mut Muxer,
    tracks: &mut TrackTable,
    observer: &dyn SaveObserver,
) -> Result<(), RecorderError> {
    debug_assert_eq!(encoder.kind(), T::KIND);
    let kind = T::KIND;
    encoder.submit_draining(sample.payload(), pts_us, |output| {
        route(kind, output, muxer, tracks, observer)
    })?;
    pump(encoder, muxer, tracks, observer)
}

/// Moves everything the encoder has ready into the muxer.
fn pump(
    encoder: &mut EncoderAdapter,
    muxer: &mut Muxer,
    tracks: &mut TrackTable,
    observer: &dyn SaveObserver,
) -> Result<(), RecorderError> {
    while let Some(output) = encoder.poll_output()? {
        route(encoder.kind(), output, muxer, tracks, observer)?;
    }
    Ok(())
}

fn route(
    kind: TrackKind,
    output: EncoderOutput,
    muxer: &mut Muxer,
    tracks: &mut TrackTable,
    observer: &dyn SaveObserver,
) -> Result<(), RecorderError> {
    match output {
        EncoderOutput::TrackFormat(descriptor) => {
            let index = muxer.register_track(kind, descriptor)?;
            *tracks.slot(kind) = Some(index);
            observer.on_track_registered(kind, index);
            if muxer.has_all_tracks() && !muxer.is_started() {
                muxer.start()?;
            }
        }
        EncoderOutput::Chunk(chunk) => {
            let index = tracks
                .get(kind)
                .ok_or(EncoderError::DataBeforeFormat { kind })?;
            tracing::trace!(%kind, pts_us = chunk.pts_us, eos = chunk.end_of_stream, "muxing chunk");
            muxer.write(index, chunk)?;
        }
    }
    Ok(())
}
