//! Interleaving muxer.
//!
//! The muxer accepts one track per stream kind. Chunks written before
//! [`Muxer::start`] are held in a pending list and flushed in timestamp
//! order once both tracks exist, so an encoder that announces its format
//! late never loses the other encoder's early output.
//!
//! Records go to `<path>.partial` and the file is renamed onto `path` only
//! after a successful finalize, so an existing container at `path` survives
//! a save that fails.

pub mod container;

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::chunk::{EncodedChunk, TrackKind};
use crate::encoder::FormatDescriptor;
use crate::error::MuxerError;
use container::TrailerEntry;

/// A registered output track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Index used to address the track.
    pub index: u16,
    /// Stream kind.
    pub kind: TrackKind,
    /// Codec output format.
    pub descriptor: FormatDescriptor,
}

/// Result of a successful [`Muxer::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSummary {
    /// The finished container file.
    pub path: PathBuf,
    /// Data records per track kind, excluding end of stream.
    pub samples_per_track: Vec<(TrackKind, u32)>,
    /// Total records written, including end-of-stream markers.
    pub records: u32,
}

impl MuxSummary {
    /// Data record count for `kind`, or zero if the track is absent.
    pub fn samples(&self, kind: TrackKind) -> u32 {
        self.samples_per_track
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TrackProgress {
    samples: u32,
    first_pts_us: Option<u64>,
    last_pts_us: Option<u64>,
    end_of_stream: bool,
}

/// Writes encoded chunks from both streams into one container file.
pub struct Muxer {
    path: PathBuf,
    partial_path: PathBuf,
    writer: Option<BufWriter<File>>,
    tracks: Vec<Track>,
    progress: Vec<TrackProgress>,
    pending: Vec<(u16, EncodedChunk)>,
    records: u32,
    started: bool,
    finalized: bool,
}

impl Muxer {
    /// Creates the working file next to `path`. Nothing at `path` is
    /// touched until [`finalize`](Self::finalize).
    pub fn create(path: impl AsRef<Path>) -> Result<Self, MuxerError> {
        let path = path.as_ref().to_path_buf();
        let partial_path = partial_path_for(&path);
        let file = File::create(&partial_path).map_err(|e| MuxerError::io(&partial_path, e))?;
        tracing::debug!(path = %partial_path.display(), "muxer created");
        Ok(Self {
            path,
            partial_path,
            writer: Some(BufWriter::new(file)),
            tracks: Vec::with_capacity(TrackKind::ALL.len()),
            progress: Vec::with_capacity(TrackKind::ALL.len()),
            pending: Vec::new(),
            records: 0,
            started: false,
            finalized: false,
        })
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the file being written before finalize.
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Whether [`start`](Self::start) has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Registered tracks in index order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Number of chunks waiting for [`start`](Self::start).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether both stream kinds have a track.
    pub fn has_all_tracks(&self) -> bool {
        TrackKind::ALL
            .iter()
            .all(|kind| self.tracks.iter().any(|t| t.kind == *kind))
    }

    /// Registers the track for `kind` and returns its index.
    pub fn register_track(
        &mut self,
        kind: TrackKind,
        descriptor: FormatDescriptor,
    ) -> Result<u16, MuxerError> {
        self.ensure_open()?;
        if self.started {
            return Err(MuxerError::AlreadyStarted);
        }
        if self.tracks.iter().any(|t| t.kind == kind) {
            return Err(MuxerError::TrackAlreadyRegistered { kind });
        }
        // at most one track per kind, so the index always fits
        let index = self.tracks.len() as u16;
        tracing::debug!(%kind, index, "track registered");
        self.tracks.push(Track {
            index,
            kind,
            descriptor,
        });
        self.progress.push(TrackProgress::default());
        Ok(index)
    }

    /// Writes the header and track table, then flushes pending chunks.
    pub fn start(&mut self) -> Result<(), MuxerError> {
        self.ensure_open()?;
        if self.started {
            return Err(MuxerError::AlreadyStarted);
        }
        if let Some(kind) = TrackKind::ALL
            .into_iter()
            .find(|kind| !self.tracks.iter().any(|t| t.kind == *kind))
        {
            return Err(MuxerError::MissingTrack { kind });
        }

        let path = &self.partial_path;
        let writer = self.writer.as_mut().ok_or_else(|| aborted(path))?;
        container::write_header(writer, self.tracks.len() as u16)
            .map_err(|e| MuxerError::io(path, e))?;
        for track in &self.tracks {
            container::write_track(writer, track.index, track.kind, track.descriptor.as_bytes())
                .map_err(|e| MuxerError::io(path, e))?;
        }
        self.started = true;

        let mut pending = std::mem::take(&mut self.pending);
        // stable: equal timestamps keep arrival order
        pending.sort_by_key(|(_, chunk)| chunk.pts_us);
        let flushed = pending.len();
        for (index, chunk) in &pending {
            self.write_record(*index, chunk)?;
        }
        tracing::info!(
            path = %self.path.display(),
            tracks = self.tracks.len(),
            flushed,
            "muxer started"
        );
        Ok(())
    }

    /// Writes `chunk` to track `index`, or queues it until start.
    pub fn write(&mut self, index: u16, chunk: EncodedChunk) -> Result<(), MuxerError> {
        self.ensure_open()?;
        let track = self
            .tracks
            .get(usize::from(index))
            .ok_or(MuxerError::UnknownTrack { index })?;
        let kind = track.kind;
        if kind != chunk.kind {
            return Err(MuxerError::TrackKindMismatch {
                index,
                track_kind: kind,
                chunk_kind: chunk.kind,
            });
        }
        if u32::try_from(chunk.data.len()).is_err() {
            return Err(MuxerError::ChunkTooLarge {
                kind,
                len: chunk.data.len(),
            });
        }

        let progress = &mut self.progress[usize::from(index)];
        if progress.end_of_stream {
            return Err(MuxerError::WriteAfterEndOfStream { kind });
        }
        if let Some(last_pts_us) = progress.last_pts_us {
            if chunk.pts_us < last_pts_us {
                return Err(MuxerError::NonMonotonicTimestamp {
                    kind,
                    pts_us: chunk.pts_us,
                    last_pts_us,
                });
            }
        }
        progress.first_pts_us.get_or_insert(chunk.pts_us);
        progress.last_pts_us = Some(chunk.pts_us);
        if chunk.end_of_stream {
            progress.end_of_stream = true;
        } else {
            progress.samples += 1;
        }

        if self.started {
            self.write_record(index, &chunk)
        } else {
            tracing::trace!(%kind, pts_us = chunk.pts_us, "chunk held until start");
            self.pending.push((index, chunk));
            Ok(())
        }
    }

    /// Writes the trailer, patches the header, closes the file and moves
    /// it onto the output path, replacing any file already there.
    pub fn finalize(&mut self) -> Result<MuxSummary, MuxerError> {
        self.ensure_open()?;
        if !self.started {
            return Err(MuxerError::NotStarted);
        }
        if let Some(track) = self
            .tracks
            .iter()
            .find(|t| !self.progress[usize::from(t.index)].end_of_stream)
        {
            return Err(MuxerError::MissingEndOfStream { kind: track.kind });
        }

        let entries: Vec<TrailerEntry> = self
            .tracks
            .iter()
            .map(|t| {
                let progress = self.progress[usize::from(t.index)];
                TrailerEntry {
                    index: t.index,
                    samples: progress.samples,
                    first_pts_us: progress.first_pts_us.unwrap_or(0),
                    last_pts_us: progress.last_pts_us.unwrap_or(0),
                }
            })
            .collect();

        let partial = self.partial_path.clone();
        let records = self.records;
        let writer = self.writer_mut()?;
        container::write_trailer(writer, &entries).map_err(|e| MuxerError::io(&partial, e))?;
        container::patch_header(writer, records).map_err(|e| MuxerError::io(&partial, e))?;
        writer.flush().map_err(|e| MuxerError::io(&partial, e))?;
        if let Some(writer) = self.writer.take() {
            writer
                .into_inner()
                .map_err(|e| MuxerError::io(&partial, e.into_error()))?
                .sync_all()
                .map_err(|e| MuxerError::io(&partial, e))?;
        }
        // a failed rename leaves the muxer unfinalized; abort removes the partial file
        std::fs::rename(&partial, &self.path).map_err(|e| MuxerError::io(&self.path, e))?;
        self.finalized = true;

        let summary = MuxSummary {
            path: self.path.clone(),
            samples_per_track: self
                .tracks
                .iter()
                .map(|t| (t.kind, self.progress[usize::from(t.index)].samples))
                .collect(),
            records,
        };
        tracing::info!(
            path = %summary.path.display(),
            records,
            video_samples = summary.samples(TrackKind::Video),
            audio_samples = summary.samples(TrackKind::Audio),
            "container finalized"
        );
        Ok(summary)
    }

    /// Closes and removes the partial file, leaving the output path as it
    /// was. Does nothing after finalize.
    pub fn abort(&mut self) {
        if self.finalized {
            return;
        }
        self.writer = None;
        self.pending.clear();
        match std::fs::remove_file(&self.partial_path) {
            Ok(()) => {
                tracing::debug!(path = %self.partial_path.display(), "removed partial container");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.partial_path.display(),
                error = %e,
                "failed to remove partial container"
            ),
        }
    }

    fn ensure_open(&self) -> Result<(), MuxerError> {
        if self.finalized {
            Err(MuxerError::AlreadyFinalized)
        } else if self.writer.is_none() {
            Err(aborted(&self.partial_path))
        } else {
            Ok(())
        }
    }

    fn writer_mut(&mut self) -> Result<&mut BufWriter<File>, MuxerError> {
        let path = &self.partial_path;
        self.writer.as_mut().ok_or_else(|| aborted(path))
    }

    fn write_record(&mut self, index: u16, chunk: &EncodedChunk) -> Result<(), MuxerError> {
        let path = self.partial_path.clone();
        let writer = self.writer_mut()?;
        container::write_record(writer, index, chunk).map_err(|e| MuxerError::io(&path, e))?;
        self.records += 1;
        Ok(())
    }
}

/// `out.avrb` becomes `out.avrb.partial` in the same directory.
fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn aborted(path: &Path) -> MuxerError {
    MuxerError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, "muxer was aborted"),
    )
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if self.writer.is_some() {
            tracing::warn!(path = %self.path.display(), "muxer dropped before finalize");
        }
        self.abort();
    }
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("path", &self.path)
            .field("partial_path", &self.partial_path)
            .field("tracks", &self.tracks)
            .field("pending", &self.pending.len())
            .field("records", &self.records)
            .field("started", &self.started)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor(tag: &[u8]) -> FormatDescriptor {
        FormatDescriptor::new(tag.to_vec())
    }

    fn video(pts: u64) -> EncodedChunk {
        EncodedChunk::new(TrackKind::Video, vec![1u8, 2, 3], pts)
    }

    fn audio(pts: u64) -> EncodedChunk {
        EncodedChunk::new(TrackKind::Audio, vec![4u8, 5], pts)
    }

    #[test]
    fn test_start_requires_both_tracks() {
        let dir = tempdir().unwrap();
        let mut muxer = Muxer::create(dir.path().join("out.avrb")).unwrap();
        muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();
        let err = muxer.start().unwrap_err();
        assert!(matches!(err, MuxerError::MissingTrack { kind: TrackKind::Audio }));
        assert!(!muxer.is_started());
    }

    #[test]
    fn test_duplicate_track_rejected() {
        let dir = tempdir().unwrap();
        let mut muxer = Muxer::create(dir.path().join("out.avrb")).unwrap();
        muxer.register_track(TrackKind::Audio, descriptor(b"a")).unwrap();
        let err = muxer
            .register_track(TrackKind::Audio, descriptor(b"a"))
            .unwrap_err();
        assert!(matches!(err, MuxerError::TrackAlreadyRegistered { .. }));
    }

    #[test]
    fn test_pending_chunks_flushed_in_pts_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.avrb");
        let mut muxer = Muxer::create(&path).unwrap();

        let a = muxer.register_track(TrackKind::Audio, descriptor(b"a")).unwrap();
        muxer.write(a, audio(0)).unwrap();
        muxer.write(a, audio(20)).unwrap();
        let v = muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();
        muxer.write(v, video(10)).unwrap();
        assert_eq!(muxer.pending_len(), 3);

        muxer.start().unwrap();
        assert_eq!(muxer.pending_len(), 0);
        muxer.write(v, video(30)).unwrap();
        muxer.write(a, EncodedChunk::end_of_stream(TrackKind::Audio, 20)).unwrap();
        muxer.write(v, EncodedChunk::end_of_stream(TrackKind::Video, 30)).unwrap();
        let summary = muxer.finalize().unwrap();
        assert_eq!(summary.samples(TrackKind::Video), 2);
        assert_eq!(summary.samples(TrackKind::Audio), 2);
        assert_eq!(summary.records, 6);

        let file = container::read_container(&path).unwrap();
        let pts: Vec<u64> = file.records.iter().map(|r| r.pts_us).collect();
        assert_eq!(pts[..3], [0, 10, 20]);
        assert!(file.finalized);
    }

    #[test]
    fn test_double_start_rejected() {
        let dir = tempdir().unwrap();
        let mut muxer = Muxer::create(dir.path().join("out.avrb")).unwrap();
        muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();
        muxer.register_track(TrackKind::Audio, descriptor(b"a")).unwrap();
        muxer.start().unwrap();
        assert!(matches!(muxer.start(), Err(MuxerError::AlreadyStarted)));
        assert!(matches!(
            muxer.register_track(TrackKind::Video, descriptor(b"v")),
            Err(MuxerError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_finalize_requires_start_and_eos() {
        let dir = tempdir().unwrap();
        let mut muxer = Muxer::create(dir.path().join("out.avrb")).unwrap();
        let v = muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();
        let a = muxer.register_track(TrackKind::Audio, descriptor(b"a")).unwrap();
        assert!(matches!(muxer.finalize(), Err(MuxerError::NotStarted)));

        muxer.start().unwrap();
        muxer.write(v, EncodedChunk::end_of_stream(TrackKind::Video, 0)).unwrap();
        assert!(matches!(
            muxer.finalize(),
            Err(MuxerError::MissingEndOfStream { kind: TrackKind::Audio })
        ));

        muxer.write(a, EncodedChunk::end_of_stream(TrackKind::Audio, 0)).unwrap();
        muxer.finalize().unwrap();
        assert!(matches!(muxer.finalize(), Err(MuxerError::AlreadyFinalized)));
        assert!(matches!(
            muxer.write(v, video(1)),
            Err(MuxerError::AlreadyFinalized)
        ));
    }

    #[test]
    fn test_write_validation() {
        let dir = tempdir().unwrap();
        let mut muxer = Muxer::create(dir.path().join("out.avrb")).unwrap();
        let v = muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();

        assert!(matches!(muxer.write(7, video(0)), Err(MuxerError::UnknownTrack { index: 7 })));
        assert!(matches!(
            muxer.write(v, audio(0)),
            Err(MuxerError::TrackKindMismatch { .. })
        ));

        muxer.write(v, video(50)).unwrap();
        assert!(matches!(
            muxer.write(v, video(40)),
            Err(MuxerError::NonMonotonicTimestamp { pts_us: 40, last_pts_us: 50, .. })
        ));

        muxer.write(v, EncodedChunk::end_of_stream(TrackKind::Video, 50)).unwrap();
        assert!(matches!(
            muxer.write(v, video(60)),
            Err(MuxerError::WriteAfterEndOfStream { .. })
        ));
    }

    fn finished(path: &Path) -> MuxSummary {
        let mut muxer = Muxer::create(path).unwrap();
        let v = muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();
        let a = muxer.register_track(TrackKind::Audio, descriptor(b"a")).unwrap();
        muxer.start().unwrap();
        muxer.write(v, video(0)).unwrap();
        muxer.write(a, audio(0)).unwrap();
        muxer.write(v, EncodedChunk::end_of_stream(TrackKind::Video, 0)).unwrap();
        muxer.write(a, EncodedChunk::end_of_stream(TrackKind::Audio, 0)).unwrap();
        muxer.finalize().unwrap()
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path_for(Path::new("/tmp/clip.avrb")),
            Path::new("/tmp/clip.avrb.partial")
        );
        assert_eq!(partial_path_for(Path::new("clip")), Path::new("clip.partial"));
    }

    #[test]
    fn test_output_appears_only_after_finalize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.avrb");
        let mut muxer = Muxer::create(&path).unwrap();
        let partial = muxer.partial_path().to_path_buf();
        assert!(partial.exists());
        assert!(!path.exists());
        drop(muxer);

        let summary = finished(&path);
        assert_eq!(summary.path, path);
        assert!(path.exists());
        assert!(!partial.exists());
    }

    #[test]
    fn test_abort_removes_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.avrb");
        let mut muxer = Muxer::create(&path).unwrap();
        let partial = muxer.partial_path().to_path_buf();
        assert!(partial.exists());
        muxer.abort();
        assert!(!partial.exists());
        assert!(!path.exists());
        assert!(muxer.start().is_err());
    }

    #[test]
    fn test_drop_before_finalize_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.avrb");
        let muxer = Muxer::create(&path).unwrap();
        let partial = muxer.partial_path().to_path_buf();
        drop(muxer);
        assert!(!partial.exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_abort_keeps_existing_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.avrb");
        finished(&path);
        let before = std::fs::read(&path).unwrap();

        let mut muxer = Muxer::create(&path).unwrap();
        muxer.register_track(TrackKind::Video, descriptor(b"v")).unwrap();
        muxer.abort();

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(container::read_container(&path).unwrap().finalized);
    }

    #[test]
    fn test_finalize_replaces_existing_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.avrb");
        std::fs::write(&path, b"stale").unwrap();
        finished(&path);
        assert!(container::read_container(&path).unwrap().finalized);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let err = Muxer::create("/nonexistent/directory/out.avrb").unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }
}
