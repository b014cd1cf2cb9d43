//! On-disk container layout.
//!
//! All integers are little-endian.
//!
//! ```text
//! header   : "AVRB" | version u16 | track_count u16 | record_count u32 | flags u32
//! tracks   : index u16 | kind u8 | reserved u8 | descriptor_len u32 | descriptor
//! records  : track u16 | flags u16 | pts_us u64 | len u32 | payload
//! trailer  : "TRLR" | track_count u16 | (index u16 | samples u32 | first_pts u64 | last_pts u64)*
//! ```
//!
//! `record_count` and the finalized flag are written as zero and patched in
//! place when the muxer finalizes, so an interrupted file is recognizable.

use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use crate::chunk::{EncodedChunk, TrackKind};

/// File magic.
pub const MAGIC: &[u8; 4] = b"AVRB";

/// Trailer magic.
pub const TRAILER_MAGIC: &[u8; 4] = b"TRLR";

/// Current format version.
pub const VERSION: u16 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Byte offset of the record count field.
const RECORD_COUNT_OFFSET: u64 = 8;

/// Byte offset of the header flags field.
const FLAGS_OFFSET: u64 = 12;

/// Header flag: the trailer was written and counts are final.
const FLAG_FINALIZED: u32 = 1;

/// Record flag: end-of-stream marker.
const RECORD_END_OF_STREAM: u16 = 1;

/// Record flag: key frame.
const RECORD_KEY_FRAME: u16 = 1 << 1;

const KIND_VIDEO: u8 = 0;
const KIND_AUDIO: u8 = 1;

/// Size of a record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 16;

fn kind_code(kind: TrackKind) -> u8 {
    match kind {
        TrackKind::Video => KIND_VIDEO,
        TrackKind::Audio => KIND_AUDIO,
    }
}

fn kind_from_code(code: u8) -> io::Result<TrackKind> {
    match code {
        KIND_VIDEO => Ok(TrackKind::Video),
        KIND_AUDIO => Ok(TrackKind::Audio),
        other => Err(invalid_data(format!("unknown track kind {other}"))),
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Writes the header with zeroed record count and flags.
pub(crate) fn write_header(writer: &mut impl Write, track_count: u16) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&track_count.to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;
    Ok(())
}

/// Writes one track table entry.
pub(crate) fn write_track(
    writer: &mut impl Write,
    index: u16,
    kind: TrackKind,
    descriptor: &[u8],
) -> io::Result<()> {
    let len = u32::try_from(descriptor.len())
        .map_err(|_| invalid_data("track descriptor too large"))?;
    writer.write_all(&index.to_le_bytes())?;
    writer.write_all(&[kind_code(kind), 0])?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(descriptor)?;
    Ok(())
}

/// Writes one record. The caller has checked the payload fits in a `u32`.
pub(crate) fn write_record(
    writer: &mut impl Write,
    track: u16,
    chunk: &EncodedChunk,
) -> io::Result<()> {
    let mut flags = 0u16;
    if chunk.end_of_stream {
        flags |= RECORD_END_OF_STREAM;
    }
    if chunk.key_frame {
        flags |= RECORD_KEY_FRAME;
    }
    let len = u32::try_from(chunk.data.len()).map_err(|_| invalid_data("record too large"))?;
    writer.write_all(&track.to_le_bytes())?;
    writer.write_all(&flags.to_le_bytes())?;
    writer.write_all(&chunk.pts_us.to_le_bytes())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&chunk.data)?;
    Ok(())
}

/// Writes the trailer.
pub(crate) fn write_trailer(writer: &mut impl Write, entries: &[TrailerEntry]) -> io::Result<()> {
    let count = u16::try_from(entries.len()).map_err(|_| invalid_data("too many tracks"))?;
    writer.write_all(TRAILER_MAGIC)?;
    writer.write_all(&count.to_le_bytes())?;
    for entry in entries {
        writer.write_all(&entry.index.to_le_bytes())?;
        writer.write_all(&entry.samples.to_le_bytes())?;
        writer.write_all(&entry.first_pts_us.to_le_bytes())?;
        writer.write_all(&entry.last_pts_us.to_le_bytes())?;
    }
    Ok(())
}

/// Patches the record count and sets the finalized flag.
///
/// Leaves the writer positioned at the end of the file.
pub(crate) fn patch_header(writer: &mut (impl Write + Seek), record_count: u32) -> io::Result<()> {
    writer.seek(SeekFrom::Start(RECORD_COUNT_OFFSET))?;
    writer.write_all(&record_count.to_le_bytes())?;
    writer.seek(SeekFrom::Start(FLAGS_OFFSET))?;
    writer.write_all(&FLAG_FINALIZED.to_le_bytes())?;
    writer.seek(SeekFrom::End(0))?;
    Ok(())
}

/// A track table entry read back from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTrack {
    /// Track index referenced by records.
    pub index: u16,
    /// Stream kind.
    pub kind: TrackKind,
    /// Codec format descriptor.
    pub descriptor: Vec<u8>,
}

/// A record read back from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Track index.
    pub track: u16,
    /// Presentation timestamp in microseconds.
    pub pts_us: u64,
    /// End-of-stream marker.
    pub end_of_stream: bool,
    /// Key frame flag.
    pub key_frame: bool,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

/// Per-track summary stored in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerEntry {
    /// Track index.
    pub index: u16,
    /// Number of data records, excluding end of stream.
    pub samples: u32,
    /// Timestamp of the first record.
    pub first_pts_us: u64,
    /// Timestamp of the last record.
    pub last_pts_us: u64,
}

/// A parsed container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile {
    /// Format version.
    pub version: u16,
    /// Track table in index order.
    pub tracks: Vec<ContainerTrack>,
    /// Records in file order.
    pub records: Vec<ContainerRecord>,
    /// Trailer entries, empty for an unfinalized file.
    pub trailer: Vec<TrailerEntry>,
    /// Whether the file was finalized.
    pub finalized: bool,
}

impl ContainerFile {
    /// The track of the given kind, if present.
    pub fn track(&self, kind: TrackKind) -> Option<&ContainerTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Records belonging to `track`, in file order.
    pub fn records_for(&self, track: u16) -> impl Iterator<Item = &ContainerRecord> + '_ {
        self.records.iter().filter(move |r| r.track == track)
    }
}

/// Reads and validates a container file.
///
/// Bad magic, unknown versions and truncated data are reported as
/// [`io::ErrorKind::InvalidData`].
pub fn read_container(path: impl AsRef<Path>) -> io::Result<ContainerFile> {
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

fn parse(bytes: &[u8]) -> io::Result<ContainerFile> {
    if bytes.len() < HEADER_SIZE {
        return Err(invalid_data(format!(
            "truncated header: {} of {HEADER_SIZE} bytes",
            bytes.len()
        )));
    }
    let mut cursor = Cursor { buf: bytes, pos: 0 };

    if cursor.take(4)? != MAGIC {
        return Err(invalid_data("bad magic"));
    }
    let version = cursor.u16()?;
    if version != VERSION {
        return Err(invalid_data(format!("unsupported version {version}")));
    }
    let track_count = cursor.u16()?;
    let record_count = cursor.u32()?;
    let finalized = cursor.u32()? & FLAG_FINALIZED != 0;

    let mut tracks = Vec::with_capacity(usize::from(track_count));
    for _ in 0..track_count {
        let index = cursor.u16()?;
        let kind = kind_from_code(cursor.u8()?)?;
        cursor.u8()?;
        let len = cursor.u32()? as usize;
        let descriptor = cursor.take(len)?.to_vec();
        tracks.push(ContainerTrack {
            index,
            kind,
            descriptor,
        });
    }

    let mut records = Vec::new();
    loop {
        if finalized && records.len() == record_count as usize {
            break;
        }
        if !finalized && cursor.remaining() == 0 {
            break;
        }
        let track = cursor.u16()?;
        if !tracks.iter().any(|t| t.index == track) {
            return Err(invalid_data(format!("record for unknown track {track}")));
        }
        let flags = cursor.u16()?;
        let pts_us = cursor.u64()?;
        let len = cursor.u32()? as usize;
        let payload = cursor.take(len)?.to_vec();
        records.push(ContainerRecord {
            track,
            pts_us,
            end_of_stream: flags & RECORD_END_OF_STREAM != 0,
            key_frame: flags & RECORD_KEY_FRAME != 0,
            payload,
        });
    }

    let mut trailer = Vec::new();
    if finalized {
        if cursor.take(4)? != TRAILER_MAGIC {
            return Err(invalid_data("bad trailer magic"));
        }
        let count = cursor.u16()?;
        for _ in 0..count {
            trailer.push(TrailerEntry {
                index: cursor.u16()?,
                samples: cursor.u32()?,
                first_pts_us: cursor.u64()?,
                last_pts_us: cursor.u64()?,
            });
        }
        if cursor.remaining() != 0 {
            return Err(invalid_data("trailing bytes after trailer"));
        }
    }

    Ok(ContainerFile {
        version,
        tracks,
        records,
        trailer,
        finalized,
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(invalid_data(format!(
                "truncated at byte {}: needed {n}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> io::Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> io::Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> io::Result<u64> {
        self.array().map(u64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    fn sample_file() -> Vec<u8> {
        let mut out = IoCursor::new(Vec::new());
        write_header(&mut out, 1).unwrap();
        write_track(&mut out, 0, TrackKind::Audio, b"pcm1").unwrap();
        write_record(
            &mut out,
            0,
            &EncodedChunk::new(TrackKind::Audio, vec![1u8, 2], 7).with_key_frame(true),
        )
        .unwrap();
        write_record(&mut out, 0, &EncodedChunk::end_of_stream(TrackKind::Audio, 7)).unwrap();
        write_trailer(
            &mut out,
            &[TrailerEntry {
                index: 0,
                samples: 1,
                first_pts_us: 7,
                last_pts_us: 7,
            }],
        )
        .unwrap();
        patch_header(&mut out, 2).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_file();
        assert_eq!(&bytes[0..4], b"AVRB");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), VERSION);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 1);
        assert_eq!(
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            2
        );
        assert_eq!(bytes[12], 1);
        // track entry 12, two records, trailer 28
        assert_eq!(
            bytes.len(),
            HEADER_SIZE + 12 + (RECORD_HEADER_SIZE + 2) + RECORD_HEADER_SIZE + 28
        );
    }

    #[test]
    fn test_parse_finalized_file() {
        let file = parse(&sample_file()).unwrap();
        assert!(file.finalized);
        assert_eq!(file.tracks[0].descriptor, b"pcm1");
        assert_eq!(file.records.len(), 2);
        assert!(file.records[0].key_frame);
        assert!(file.records[1].end_of_stream);
        assert_eq!(file.trailer[0].samples, 1);
    }

    #[test]
    fn test_unfinalized_file_reads_until_eof() {
        let mut out = IoCursor::new(Vec::new());
        write_header(&mut out, 1).unwrap();
        write_track(&mut out, 0, TrackKind::Video, b"rle1").unwrap();
        write_record(&mut out, 0, &EncodedChunk::new(TrackKind::Video, vec![9u8], 0)).unwrap();
        let file = parse(&out.into_inner()).unwrap();
        assert!(!file.finalized);
        assert_eq!(file.records.len(), 1);
        assert!(file.trailer.is_empty());
    }

    #[test]
    fn test_bad_magic_is_invalid_data() {
        let mut bytes = sample_file();
        bytes[0] = b'X';
        let err = parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_file_is_invalid_data() {
        let bytes = sample_file();
        let err = parse(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("truncated"));
    }
}
