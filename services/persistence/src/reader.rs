//! Segment Reader: Load and verify segments on open
//!
//! Every segment is read in full and every frame checksum is validated. A
//! segment either loads completely or is reported as corrupt with the byte
//! offset of the first bad frame; there is no partial load.

use crate::segment::{
    parse_segment_index, RecordFrame, Segment, SegmentError, SegmentHeader, HEADER_LEN,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// ── Corruption Log Entry ────────────────────────────────────────────

/// Structured corruption log entry for diagnostics.
#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    /// Segment file the corruption was found in.
    pub path: PathBuf,
    /// Byte offset in the file where corruption was detected.
    pub byte_offset: u64,
    /// Type of corruption.
    pub kind: CorruptionKind,
    /// Human-readable detail message.
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorruptionKind {
    BadHeader,
    ChecksumMismatch,
    TruncatedFrame,
    UndecodablePayload,
    CountMismatch,
}

impl CorruptionRecord {
    fn from_error(path: &Path, err: &SegmentError) -> Self {
        let (byte_offset, kind) = match err {
            SegmentError::BadHeader(_) => (0, CorruptionKind::BadHeader),
            SegmentError::ChecksumMismatch { offset, .. } => {
                (*offset, CorruptionKind::ChecksumMismatch)
            }
            SegmentError::Corrupt { offset, .. } => (*offset, CorruptionKind::TruncatedFrame),
            SegmentError::Serialization(_) => (0, CorruptionKind::UndecodablePayload),
            SegmentError::Io(_) => (0, CorruptionKind::TruncatedFrame),
        };
        Self {
            path: path.to_path_buf(),
            byte_offset,
            kind,
            detail: err.to_string(),
        }
    }
}

// ── Segment Reader ──────────────────────────────────────────────────

pub struct SegmentReader;

impl SegmentReader {
    /// Read and fully verify one segment file.
    pub fn open(path: &Path, index: u64) -> Result<Segment, SegmentError> {
        let data = fs::read(path)?;
        let header = SegmentHeader::from_bytes(&data)?;

        let mut records = Vec::with_capacity(header.record_count as usize);
        let mut pos = HEADER_LEN;
        while pos < data.len() {
            let (frame, consumed) =
                RecordFrame::from_bytes(&data[pos..]).map_err(|e| SegmentError::Corrupt {
                    offset: pos as u64,
                    detail: e.to_string(),
                })?;
            if !frame.verify_checksum() {
                return Err(SegmentError::ChecksumMismatch {
                    offset: pos as u64,
                    timestamp: frame.timestamp,
                });
            }
            let record = frame.decode()?;
            if record.timestamp != frame.timestamp {
                return Err(SegmentError::Corrupt {
                    offset: pos as u64,
                    detail: format!(
                        "frame timestamp {} disagrees with payload timestamp {}",
                        frame.timestamp, record.timestamp
                    ),
                });
            }
            records.push(record);
            pos += consumed;
        }

        if records.len() != header.record_count as usize {
            return Err(SegmentError::Corrupt {
                offset: pos as u64,
                detail: format!(
                    "header declares {} records, found {}",
                    header.record_count,
                    records.len()
                ),
            });
        }

        Ok(Segment {
            index,
            path: path.to_path_buf(),
            header,
            records,
        })
    }

    /// Like `open`, but converts corruption into a `CorruptionRecord`.
    /// IO errors other than corruption are still returned as errors.
    pub fn open_checked(
        path: &Path,
        index: u64,
    ) -> Result<Result<Segment, CorruptionRecord>, io::Error> {
        match Self::open(path, index) {
            Ok(segment) => Ok(Ok(segment)),
            Err(SegmentError::Io(e)) if e.kind() != io::ErrorKind::UnexpectedEof => Err(e),
            Err(e) => Ok(Err(CorruptionRecord::from_error(path, &e))),
        }
    }

    /// Discover all segment files in a directory, sorted by index.
    pub fn discover_segments(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut segments: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                parse_segment_index(&name).map(|idx| (idx, entry.path()))
            })
            .collect();

        segments.sort_by_key(|(idx, _)| *idx);
        Ok(segments)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
