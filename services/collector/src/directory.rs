//! Drop-directory batch source
//!
//! Batches are files named `<PREFIX>_<YYYYMMDDHHMM>_<SEQ>.csv` or
//! `<PREFIX>_<YYYYMMDDHHMM>_<SEQ>.csv.zst`. Each line starts with a row-type
//! marker:
//! - `C` comment, ignored
//! - `I` header; the remaining fields name the columns of following `D` rows
//! - `D` data row
//!
//! Timestamps may be Unix seconds or `YYYY/MM/DD HH:MM:SS` style strings in
//! UTC. Publishers that stamp the end of the interval are shifted back by one
//! interval so stored records follow the interval-start convention.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::source::{BatchRef, BatchSource, FetchError, ParsedBatch};
use types::errors::{ParseError, ParseErrorKind, ValidationError};
use types::record::RawRecord;

const ROW_COMMENT: &str = "C";
const ROW_HEADER: &str = "I";
const ROW_DATA: &str = "D";

const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";
const ROW_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Which end of its interval a published timestamp refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampConvention {
    IntervalStart,
    IntervalEnd,
}

impl Default for TimestampConvention {
    fn default() -> Self {
        TimestampConvention::IntervalStart
    }
}

/// Header names of the required columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub timestamp: String,
    pub entity: String,
    pub value: String,
    /// Extra columns copied into `RawRecord::attributes` when present
    pub attributes: Vec<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            timestamp: "SETTLEMENTDATE".to_string(),
            entity: "DUID".to_string(),
            value: "SCADAVALUE".to_string(),
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySourceConfig {
    pub dir: PathBuf,
    /// File name prefix, e.g. `DISPATCH_SCADA`
    pub prefix: String,
    pub interval_secs: i64,
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default)]
    pub timestamp_convention: TimestampConvention,
}

/// Resolved positions of the mapped columns in the current header.
struct Header {
    timestamp: usize,
    entity: usize,
    value: usize,
    attributes: Vec<(String, usize)>,
    width: usize,
}

pub struct DirectorySource {
    name: String,
    config: DirectorySourceConfig,
}

impl DirectorySource {
    pub fn new(name: impl Into<String>, config: DirectorySourceConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &DirectorySourceConfig {
        &self.config
    }

    /// Parse `<PREFIX>_<YYYYMMDDHHMM>_<SEQ>.csv[.zst]`.
    pub fn parse_batch_name(&self, file_name: &str) -> Option<(i64, u64)> {
        let rest = file_name
            .strip_prefix(self.config.prefix.as_str())?
            .strip_prefix('_')?;
        let stem = rest
            .strip_suffix(".csv.zst")
            .or_else(|| rest.strip_suffix(".csv"))?;
        let (stamp, seq) = stem.split_once('_')?;
        let ts = NaiveDateTime::parse_from_str(stamp, NAME_TIMESTAMP_FORMAT)
            .ok()?
            .and_utc()
            .timestamp();
        let seq = seq.parse::<u64>().ok()?;
        Some((ts, seq))
    }

    /// Locate the mapped columns in an `I` row. The error names the first
    /// required column the table lacks.
    fn resolve_header(&self, fields: &[&str]) -> Result<Header, String> {
        let position = |column: &str| -> Result<usize, String> {
            fields
                .iter()
                .position(|f| f.eq_ignore_ascii_case(column))
                .ok_or_else(|| column.to_string())
        };
        let cols = &self.config.columns;
        let attributes = cols
            .attributes
            .iter()
            .filter_map(|name| {
                fields
                    .iter()
                    .position(|f| f.eq_ignore_ascii_case(name))
                    .map(|pos| (name.clone(), pos))
            })
            .collect();
        Ok(Header {
            timestamp: position(&cols.timestamp)?,
            entity: position(&cols.entity)?,
            value: position(&cols.value)?,
            attributes,
            width: fields.len(),
        })
    }

    fn parse_timestamp(&self, raw: &str) -> Option<i64> {
        let ts = match raw.parse::<i64>() {
            Ok(secs) => secs,
            Err(_) => ROW_TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc().timestamp())
                .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.timestamp()))?,
        };
        Some(match self.config.timestamp_convention {
            TimestampConvention::IntervalStart => ts,
            TimestampConvention::IntervalEnd => ts - self.config.interval_secs,
        })
    }

    fn parse_data_row(&self, header: &Header, fields: &[&str]) -> Result<RawRecord, ParseErrorKind> {
        if fields.len() < header.width {
            return Err(ParseErrorKind::ColumnCount {
                expected: header.width,
                actual: fields.len(),
            });
        }
        let cols = &self.config.columns;

        let raw_ts = fields[header.timestamp];
        if raw_ts.is_empty() {
            return Err(ParseErrorKind::MissingField {
                column: cols.timestamp.clone(),
            });
        }
        let timestamp = self
            .parse_timestamp(raw_ts)
            .ok_or_else(|| ParseErrorKind::InvalidTimestamp(raw_ts.to_string()))?;

        let entity = fields[header.entity];
        if entity.is_empty() {
            return Err(ParseErrorKind::MissingField {
                column: cols.entity.clone(),
            });
        }

        let raw_value = fields[header.value];
        if raw_value.is_empty() {
            return Err(ParseErrorKind::MissingField {
                column: cols.value.clone(),
            });
        }
        let value = raw_value
            .parse::<f64>()
            .map_err(|_| ParseErrorKind::InvalidNumber(raw_value.to_string()))?;

        let mut record = RawRecord::new(timestamp, entity, value);
        for (name, pos) in &header.attributes {
            if !fields[*pos].is_empty() {
                record = record.with_attribute(name.clone(), fields[*pos]);
            }
        }
        Ok(record)
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(|f| f.trim().trim_matches('"')).collect()
}

fn io_to_fetch(err: io::Error, what: &str) -> FetchError {
    match err.kind() {
        io::ErrorKind::NotFound => FetchError::NotFound(what.to_string()),
        io::ErrorKind::TimedOut => FetchError::Timeout,
        _ => FetchError::Unavailable(format!("{what}: {err}")),
    }
}

#[async_trait]
impl BatchSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_batches(&self) -> Result<Vec<BatchRef>, FetchError> {
        let mut entries = tokio::fs::read_dir(&self.config.dir).await.map_err(|e| {
            FetchError::Unavailable(format!("{}: {}", self.config.dir.display(), e))
        })?;

        let mut batches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with(self.config.prefix.as_str()) {
                continue;
            }
            match self.parse_batch_name(&file_name) {
                Some((timestamp, sequence)) => batches.push(BatchRef {
                    location: entry.path().to_string_lossy().to_string(),
                    name: file_name,
                    timestamp,
                    sequence,
                }),
                None => warn!(source = %self.name, file = %file_name, "Skipping unrecognised batch file"),
            }
        }

        debug!(source = %self.name, batches = batches.len(), "Listed batches");
        Ok(batches)
    }

    async fn fetch(&self, batch: &BatchRef) -> Result<Vec<u8>, FetchError> {
        let raw = tokio::fs::read(&batch.location)
            .await
            .map_err(|e| io_to_fetch(e, &batch.name))?;
        if batch.name.ends_with(".zst") {
            zstd::decode_all(raw.as_slice())
                .map_err(|e| FetchError::Fatal(format!("{}: zstd decode failed: {}", batch.name, e)))
        } else {
            Ok(raw)
        }
    }

    fn parse(&self, batch: &BatchRef, bytes: &[u8]) -> Result<ParsedBatch, ValidationError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ValidationError::InvalidEncoding)?;

        // A file may carry several tables; only those with the mapped
        // columns yield records.
        let mut header: Option<Result<Header, String>> = None;
        let mut usable_header = false;
        let mut first_missing: Option<String> = None;
        let mut parsed = ParsedBatch::default();
        let mut row_types: BTreeMap<&str, usize> = BTreeMap::new();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let fields = split_fields(line);
            let marker = fields[0];
            match marker {
                ROW_COMMENT => {}
                ROW_HEADER => {
                    let resolved = self.resolve_header(&fields);
                    match &resolved {
                        Ok(_) => usable_header = true,
                        Err(column) => {
                            debug!(
                                source = %self.name,
                                batch = %batch.name,
                                line = line_no,
                                column = %column,
                                "Table lacks a mapped column, skipping its rows"
                            );
                            first_missing.get_or_insert_with(|| column.clone());
                        }
                    }
                    header = Some(resolved);
                }
                ROW_DATA => {
                    parsed.data_rows += 1;
                    let current = header.as_ref().ok_or(ValidationError::MissingHeader)?;
                    let row = match current {
                        Ok(current) => self.parse_data_row(current, &fields),
                        Err(column) => Err(ParseErrorKind::UnmappedTable {
                            column: column.clone(),
                        }),
                    };
                    match row {
                        Ok(record) => parsed.records.push(record),
                        Err(kind) => parsed.parse_errors.push(ParseError::new(line_no, kind)),
                    }
                }
                other => parsed.parse_errors.push(ParseError::new(
                    line_no,
                    ParseErrorKind::UnknownRowType(other.to_string()),
                )),
            }
            *row_types.entry(marker).or_default() += 1;
        }

        if !usable_header {
            if let Some(column) = first_missing {
                return Err(ValidationError::MissingColumn { column });
            }
        }

        debug!(
            source = %self.name,
            batch = %batch.name,
            rows = ?row_types,
            records = parsed.records.len(),
            errors = parsed.parse_errors.len(),
            "Parsed batch"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
C,NEMP.WORLD,DISPATCH_SCADA
I,DISPATCH,UNIT_SCADA,1,SETTLEMENTDATE,DUID,SCADAVALUE
D,DISPATCH,UNIT_SCADA,1,\"2024/01/01 00:05:00\",UNIT1,100.5
D,DISPATCH,UNIT_SCADA,1,\"2024/01/01 00:05:00\",UNIT2,-20
D,DISPATCH,UNIT_SCADA,1,\"2024/01/01 00:05:00\",UNIT3,abc
C,END OF REPORT
";

    fn source(dir: &std::path::Path, convention: TimestampConvention) -> DirectorySource {
        DirectorySource::new(
            "scada",
            DirectorySourceConfig {
                dir: dir.to_path_buf(),
                prefix: "PUBLIC_DISPATCHSCADA".to_string(),
                interval_secs: 300,
                columns: ColumnMapping::default(),
                timestamp_convention: convention,
            },
        )
    }

    fn batch(name: &str) -> BatchRef {
        BatchRef {
            name: name.to_string(),
            timestamp: 0,
            sequence: 0,
            location: name.to_string(),
        }
    }

    #[test]
    fn test_parse_batch_name() {
        let tmp = TempDir::new().unwrap();
        let src = source(tmp.path(), TimestampConvention::IntervalStart);
        let (ts, seq) = src
            .parse_batch_name("PUBLIC_DISPATCHSCADA_202401010005_0000000412.csv.zst")
            .unwrap();
        assert_eq!(ts, 1_704_067_500);
        assert_eq!(seq, 412);
        assert!(src.parse_batch_name("PUBLIC_DISPATCHSCADA_2024_x.csv").is_none());
        assert!(src.parse_batch_name("PUBLIC_DISPATCHSCADA_202401010005_1.txt").is_none());
        assert!(src.parse_batch_name("OTHER_202401010005_1.csv").is_none());
    }

    #[test]
    fn test_parse_rows_with_end_convention() {
        let tmp = TempDir::new().unwrap();
        let src = source(tmp.path(), TimestampConvention::IntervalEnd);
        let parsed = src.parse(&batch("b"), SAMPLE.as_bytes()).unwrap();

        assert_eq!(parsed.data_rows, 3);
        assert_eq!(parsed.records.len(), 2);
        // 00:05 interval-ending → 00:00 interval-starting
        assert_eq!(parsed.records[0].timestamp, 1_704_067_200);
        assert_eq!(parsed.records[0].entity_id.as_str(), "UNIT1");
        assert_eq!(parsed.records[1].value, -20.0);
        assert_eq!(parsed.parse_errors.len(), 1);
        assert_eq!(parsed.parse_errors[0].line, 5);
        assert_eq!(
            parsed.parse_errors[0].kind,
            ParseErrorKind::InvalidNumber("abc".to_string())
        );
    }

    #[test]
    fn test_missing_required_column_rejects_batch() {
        let tmp = TempDir::new().unwrap();
        let src = source(tmp.path(), TimestampConvention::IntervalStart);
        let text = "I,DISPATCH,UNIT_SCADA,1,SETTLEMENTDATE,DUID\nD,DISPATCH,UNIT_SCADA,1,0,U1\n";
        let err = src.parse(&batch("b"), text.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingColumn {
                column: "SCADAVALUE".to_string()
            }
        );
    }

    #[test]
    fn test_rows_of_unmapped_tables_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let src = source(tmp.path(), TimestampConvention::IntervalStart);
        let text = "\
C,NEMP.WORLD,DISPATCH
I,DISPATCH,CASE_SOLUTION,1,SETTLEMENTDATE,RUNNO
D,DISPATCH,CASE_SOLUTION,1,600,1
I,DISPATCH,UNIT_SCADA,1,SETTLEMENTDATE,DUID,SCADAVALUE
D,DISPATCH,UNIT_SCADA,1,600,U1,5
D,DISPATCH,UNIT_SCADA,1,600,U2,7
I,DISPATCH,INTERCONNECTOR,1,SETTLEMENTDATE,FLOW
D,DISPATCH,INTERCONNECTOR,1,600,120
";
        let parsed = src.parse(&batch("b"), text.as_bytes()).unwrap();
        assert_eq!(parsed.data_rows, 4);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[1].entity_id.as_str(), "U2");
        let skipped: Vec<usize> = parsed.parse_errors.iter().map(|e| e.line).collect();
        assert_eq!(skipped, vec![3, 8]);
        assert_eq!(
            parsed.parse_errors[0].kind,
            ParseErrorKind::UnmappedTable {
                column: "DUID".to_string()
            }
        );
    }

    #[test]
    fn test_data_before_header_rejects_batch() {
        let tmp = TempDir::new().unwrap();
        let src = source(tmp.path(), TimestampConvention::IntervalStart);
        let err = src.parse(&batch("b"), b"D,x,y,1,0,U1,5\n").unwrap_err();
        assert_eq!(err, ValidationError::MissingHeader);
    }

    #[test]
    fn test_attribute_columns_copied() {
        let tmp = TempDir::new().unwrap();
        let mut src = source(tmp.path(), TimestampConvention::IntervalStart);
        src.config.columns.attributes = vec!["REGIONID".to_string()];
        let text = "I,T,SETTLEMENTDATE,DUID,SCADAVALUE,REGIONID\nD,T,600,U1,5,NSW1\n";
        let parsed = src.parse(&batch("b"), text.as_bytes()).unwrap();
        assert_eq!(
            parsed.records[0].attributes.get("REGIONID").map(String::as_str),
            Some("NSW1")
        );
    }

    #[tokio::test]
    async fn test_list_and_fetch_compressed_batch() {
        let tmp = TempDir::new().unwrap();
        let compressed = zstd::encode_all(SAMPLE.as_bytes(), 3).unwrap();
        std::fs::write(
            tmp.path().join("PUBLIC_DISPATCHSCADA_202401010005_0000000001.csv.zst"),
            compressed,
        )
        .unwrap();
        std::fs::write(tmp.path().join("PUBLIC_DISPATCHSCADA_garbage.csv"), "x").unwrap();
        std::fs::write(tmp.path().join("README.txt"), "x").unwrap();

        let src = source(tmp.path(), TimestampConvention::IntervalStart);
        let batches = src.list_batches().await.unwrap();
        assert_eq!(batches.len(), 1);

        let bytes = src.fetch(&batches[0]).await.unwrap();
        assert_eq!(bytes, SAMPLE.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let src = source(tmp.path(), TimestampConvention::IntervalStart);
        let missing = BatchRef {
            location: tmp.path().join("nope.csv").to_string_lossy().to_string(),
            ..batch("nope.csv")
        };
        assert!(matches!(src.fetch(&missing).await, Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_directory_is_transient() {
        let tmp = TempDir::new().unwrap();
        let src = source(&tmp.path().join("absent"), TimestampConvention::IntervalStart);
        let err = src.list_batches().await.unwrap_err();
        assert!(err.is_transient());
    }
}
