//! Segment Writer: Immutable, checksummed record batches
//!
//! Every append produces exactly one new segment file. Segments are never
//! rewritten: the file is written under a temporary name, flushed, fsynced
//! and only then renamed into place, so a directory listing never exposes a
//! half-written segment.
//!
//! # Binary Format
//! ```text
//! header (32 bytes):
//! [magic:         4 bytes  "GWSG"]
//! [version:       u16]
//! [reserved:      u16]
//! [record_count:  u32]
//! [min_timestamp: i64]
//! [max_timestamp: i64]
//! [header_crc:    u32]      // CRC32C over the preceding 28 bytes
//!
//! one frame per record:
//! [body_len:    u32]
//! [timestamp:   i64]
//! [payload_len: u32][payload: bincode(RawRecord)]
//! [checksum:    u32]        // CRC32C over timestamp ++ payload
//! ```

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::record::RawRecord;

pub const SEGMENT_MAGIC: &[u8; 4] = b"GWSG";
pub const SEGMENT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 32;

/// Minimum frame body: 8 (ts) + 4 (payload_len) + 0 (payload) + 4 (crc)
const MIN_FRAME_BODY: usize = 16;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid segment header: {0}")]
    BadHeader(String),

    #[error("Checksum mismatch at byte offset {offset}: record ts={timestamp}")]
    ChecksumMismatch { offset: u64, timestamp: i64 },

    #[error("Corruption detected at byte offset {offset}: {detail}")]
    Corrupt { offset: u64, detail: String },
}

// ── Flush / Fsync Policy ────────────────────────────────────────────

/// Controls whether segment and watermark writes are fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Fsync the file and its directory on every append (production).
    EveryAppend,
    /// Only flush to the OS (tests, throwaway stores).
    Never,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        FsyncPolicy::EveryAppend
    }
}

// ── Record Frame ────────────────────────────────────────────────────

/// One persisted record inside a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFrame {
    /// Record timestamp, duplicated outside the payload for cheap pruning
    pub timestamp: i64,
    /// Bincode-serialized `RawRecord`
    pub payload: Vec<u8>,
    /// CRC32C over (timestamp ++ payload)
    pub checksum: u32,
}

impl RecordFrame {
    /// Encode a record, computing the CRC32C checksum automatically.
    pub fn encode(record: &RawRecord) -> Result<Self, SegmentError> {
        let payload =
            bincode::serialize(record).map_err(|e| SegmentError::Serialization(e.to_string()))?;
        let checksum = Self::compute_checksum(record.timestamp, &payload);
        Ok(Self {
            timestamp: record.timestamp,
            payload,
            checksum,
        })
    }

    /// Decode the payload back into a record.
    pub fn decode(&self) -> Result<RawRecord, SegmentError> {
        bincode::deserialize(&self.payload).map_err(|e| SegmentError::Serialization(e.to_string()))
    }

    pub fn compute_checksum(timestamp: i64, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Validate the stored checksum against recomputed value.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.timestamp, &self.payload)
    }

    /// Serialize the frame to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = self.payload.len() as u32;
        let body_len: u32 = 8 + 4 + payload_len + 4;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize a frame from the binary wire format.
    ///
    /// Returns `(frame, bytes_consumed)` on success. Corrupted input yields an
    /// error rather than a panic.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), SegmentError> {
        if data.len() < 4 {
            return Err(SegmentError::Serialization(
                "Not enough data for length prefix".into(),
            ));
        }

        let body_len = read_u32(data, 0) as usize;
        if body_len > 64 * 1024 * 1024 {
            return Err(SegmentError::Serialization(format!(
                "Implausible body length: {} (likely corruption)",
                body_len
            )));
        }
        if body_len < MIN_FRAME_BODY {
            return Err(SegmentError::Serialization(format!(
                "Body too small: {} bytes, minimum is {}",
                body_len, MIN_FRAME_BODY
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(SegmentError::Serialization(format!(
                "Incomplete frame: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let body = &data[4..total];
        let timestamp = read_i64(body, 0);
        let payload_len = read_u32(body, 8) as usize;
        if 12 + payload_len + 4 != body.len() {
            return Err(SegmentError::Serialization(format!(
                "payload_len {} inconsistent with body length {}",
                payload_len,
                body.len()
            )));
        }
        let payload = body[12..12 + payload_len].to_vec();
        let checksum = read_u32(body, 12 + payload_len);

        Ok((
            Self {
                timestamp,
                payload,
                checksum,
            },
            total,
        ))
    }
}

// ── Segment Header ──────────────────────────────────────────────────

/// Fixed-size segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub record_count: u32,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

impl SegmentHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        // 6..8 reserved
        buf[8..12].copy_from_slice(&self.record_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.min_timestamp.to_le_bytes());
        buf[20..28].copy_from_slice(&self.max_timestamp.to_le_bytes());
        let crc = crc32c(&buf[0..28]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SegmentError> {
        if data.len() < HEADER_LEN {
            return Err(SegmentError::BadHeader(format!(
                "file too short for header: {} bytes",
                data.len()
            )));
        }
        if &data[0..4] != SEGMENT_MAGIC {
            return Err(SegmentError::BadHeader("bad magic".into()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != SEGMENT_VERSION {
            return Err(SegmentError::BadHeader(format!(
                "unsupported segment version {}",
                version
            )));
        }
        let stored_crc = read_u32(data, 28);
        if stored_crc != crc32c(&data[0..28]) {
            return Err(SegmentError::BadHeader("header checksum mismatch".into()));
        }
        Ok(Self {
            record_count: read_u32(data, 8),
            min_timestamp: read_i64(data, 12),
            max_timestamp: read_i64(data, 20),
        })
    }
}

// ── Segment ─────────────────────────────────────────────────────────

/// A loaded, immutable segment. Records are sorted by timestamp; rows with
/// equal timestamps keep their ingestion order.
#[derive(Debug)]
pub struct Segment {
    pub index: u64,
    pub path: PathBuf,
    pub header: SegmentHeader,
    pub records: Vec<RawRecord>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any record of this segment may fall in `[start, end)`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        !self.records.is_empty() && self.header.max_timestamp >= start && self.header.min_timestamp < end
    }
}

/// File name of segment `index`.
pub fn segment_file_name(index: u64) -> String {
    format!("seg-{:08}.bin", index)
}

/// Parse a segment index out of a file name produced by `segment_file_name`.
pub fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix("seg-")?
        .strip_suffix(".bin")?
        .parse::<u64>()
        .ok()
}

// ── Writer ──────────────────────────────────────────────────────────

/// Write `records` as segment `index` in `dir` and return the loaded segment.
///
/// The caller must pass a non-empty batch; records are stably sorted by
/// timestamp before encoding.
pub fn write_segment(
    dir: &Path,
    index: u64,
    mut records: Vec<RawRecord>,
    fsync: FsyncPolicy,
) -> Result<Segment, SegmentError> {
    if records.is_empty() {
        return Err(SegmentError::Serialization("refusing to write empty segment".into()));
    }
    records.sort_by_key(|r| r.timestamp);

    let header = SegmentHeader {
        record_count: records.len() as u32,
        min_timestamp: records[0].timestamp,
        max_timestamp: records[records.len() - 1].timestamp,
    };

    let final_path = dir.join(segment_file_name(index));
    let tmp_path = dir.join(format!("{}.tmp", segment_file_name(index)));

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header.to_bytes())?;
        for record in &records {
            writer.write_all(&RecordFrame::encode(record)?.to_bytes())?;
        }
        writer.flush()?;
        if fsync == FsyncPolicy::EveryAppend {
            writer.get_ref().sync_all()?;
        }
    }

    fs::rename(&tmp_path, &final_path)?;
    if fsync == FsyncPolicy::EveryAppend {
        sync_dir(dir)?;
    }

    Ok(Segment {
        index,
        path: final_path,
        header,
        records,
    })
}

/// Fsync a directory so a rename inside it is durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_i64(data: &[u8], at: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    i64::from_le_bytes(b)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(ts: i64, entity: &str, value: f64) -> RawRecord {
        RawRecord::new(ts, entity, value)
    }

    #[test]
    fn test_frame_checksum_computation() {
        let frame = RecordFrame::encode(&sample(300, "U1", 1.5)).unwrap();
        assert!(frame.verify_checksum());
    }

    #[test]
    fn test_frame_checksum_detects_tamper() {
        let mut frame = RecordFrame::encode(&sample(300, "U1", 1.5)).unwrap();
        frame.payload[0] ^= 0xFF;
        assert!(!frame.verify_checksum());
    }

    #[test]
    fn test_frame_rejects_truncated_input() {
        let bytes = RecordFrame::encode(&sample(300, "U1", 1.5)).unwrap().to_bytes();
        assert!(RecordFrame::from_bytes(&bytes[..bytes.len() - 2]).is_err());
        assert!(RecordFrame::from_bytes(&bytes[..3]).is_err());
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = SegmentHeader {
            record_count: 1,
            min_timestamp: 0,
            max_timestamp: 0,
        }
        .to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            SegmentHeader::from_bytes(&bytes),
            Err(SegmentError::BadHeader(_))
        ));
    }

    #[test]
    fn test_write_segment_sorts_and_names() {
        let tmp = TempDir::new().unwrap();
        let records = vec![sample(600, "U1", 1.0), sample(0, "U1", 2.0), sample(300, "U2", 3.0)];
        let seg = write_segment(tmp.path(), 7, records, FsyncPolicy::Never).unwrap();

        assert_eq!(seg.path, tmp.path().join("seg-00000007.bin"));
        assert!(seg.path.exists());
        assert_eq!(seg.header.min_timestamp, 0);
        assert_eq!(seg.header.max_timestamp, 600);
        let ts: Vec<i64> = seg.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![0, 300, 600]);
    }

    #[test]
    fn test_write_segment_leaves_no_tmp_file() {
        let tmp = TempDir::new().unwrap();
        write_segment(tmp.path(), 1, vec![sample(0, "U1", 1.0)], FsyncPolicy::EveryAppend).unwrap();
        let leftovers = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_write_segment_rejects_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(write_segment(tmp.path(), 1, Vec::new(), FsyncPolicy::Never).is_err());
    }

    #[test]
    fn test_stable_sort_keeps_ingestion_order_for_equal_timestamps() {
        let tmp = TempDir::new().unwrap();
        let records = vec![sample(300, "U1", 1.0), sample(0, "U1", 9.0), sample(300, "U1", 2.0)];
        let seg = write_segment(tmp.path(), 1, records, FsyncPolicy::Never).unwrap();
        let values: Vec<f64> = seg.records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![9.0, 1.0, 2.0]);
    }

    #[test]
    fn test_segment_file_naming() {
        assert_eq!(segment_file_name(42), "seg-00000042.bin");
        assert_eq!(parse_segment_index("seg-00000042.bin"), Some(42));
        assert_eq!(parse_segment_index("seg-00000042.bin.tmp"), None);
        assert_eq!(parse_segment_index("watermark.json"), None);
    }
}
