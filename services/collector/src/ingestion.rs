//! Batch validation at the ingestion boundary
//!
//! Turns a parsed batch into records that are safe to merge:
//! - Non-finite values are row-level errors
//! - Timestamps must sit on the dataset interval
//! - Duplicate `(timestamp, entity)` rows keep the last occurrence
//! - A batch with data rows but no valid record is rejected outright

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::source::ParsedBatch;
use types::errors::{ParseError, ParseErrorKind, ValidationError};
use types::ids::EntityId;
use types::record::RawRecord;
use types::time::is_aligned;

/// Upper bound on individual parse errors written to the log per batch.
const MAX_LOGGED_ROW_ERRORS: usize = 10;

/// A batch that passed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedBatch {
    pub records: Vec<RawRecord>,
    /// Rows rejected during parsing or validation
    pub row_errors: Vec<ParseError>,
    /// Rows dropped as in-batch duplicates
    pub duplicates: usize,
    /// Data rows seen by the parser
    pub data_rows: usize,
}

impl ValidatedBatch {
    pub fn max_timestamp(&self) -> Option<i64> {
        self.records.iter().map(|r| r.timestamp).max()
    }
}

/// Validates parsed batches for one dataset interval.
#[derive(Debug, Clone)]
pub struct BatchValidator {
    interval_secs: i64,
}

impl BatchValidator {
    pub fn new(interval_secs: i64) -> Self {
        Self { interval_secs }
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    /// Validate a parsed batch. `batch_name` is used for logging only.
    pub fn validate(
        &self,
        batch_name: &str,
        parsed: ParsedBatch,
    ) -> Result<ValidatedBatch, ValidationError> {
        let ParsedBatch {
            records,
            mut parse_errors,
            data_rows,
        } = parsed;

        let mut kept: Vec<RawRecord> = Vec::with_capacity(records.len());
        let mut index: HashMap<(i64, EntityId), usize> = HashMap::with_capacity(records.len());
        let mut duplicates = 0;

        for (row, record) in records.into_iter().enumerate() {
            if !record.value.is_finite() {
                parse_errors.push(ParseError::new(row + 1, ParseErrorKind::NonFinite));
                continue;
            }
            if !is_aligned(record.timestamp, self.interval_secs) {
                parse_errors.push(ParseError::new(
                    row + 1,
                    ParseErrorKind::Misaligned {
                        timestamp: record.timestamp,
                        interval_secs: self.interval_secs,
                    },
                ));
                continue;
            }

            let key = (record.timestamp, record.entity_id.clone());
            match index.get(&key) {
                Some(&pos) => {
                    kept[pos] = record;
                    duplicates += 1;
                }
                None => {
                    index.insert(key, kept.len());
                    kept.push(record);
                }
            }
        }

        for err in parse_errors.iter().take(MAX_LOGGED_ROW_ERRORS) {
            warn!(batch = batch_name, error = %err, "Skipping row");
        }
        if parse_errors.len() > MAX_LOGGED_ROW_ERRORS {
            warn!(
                batch = batch_name,
                suppressed = parse_errors.len() - MAX_LOGGED_ROW_ERRORS,
                "Further row errors not logged"
            );
        }

        if data_rows > 0 && kept.is_empty() {
            return Err(ValidationError::NoValidRows { rows: data_rows });
        }

        debug!(
            batch = batch_name,
            data_rows,
            valid = kept.len(),
            skipped = parse_errors.len(),
            duplicates,
            "Batch validated"
        );

        Ok(ValidatedBatch {
            records: kept,
            row_errors: parse_errors,
            duplicates,
            data_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(records: Vec<RawRecord>) -> ParsedBatch {
        ParsedBatch {
            data_rows: records.len(),
            records,
            parse_errors: Vec::new(),
        }
    }

    #[test]
    fn test_valid_batch_passes_through() {
        let v = BatchValidator::new(300);
        let out = v
            .validate("b", parsed(vec![RawRecord::new(0, "A", 1.0), RawRecord::new(300, "A", 2.0)]))
            .unwrap();
        assert_eq!(out.records.len(), 2);
        assert!(out.row_errors.is_empty());
        assert_eq!(out.max_timestamp(), Some(300));
    }

    #[test]
    fn test_non_finite_and_misaligned_are_row_errors() {
        let v = BatchValidator::new(300);
        let out = v
            .validate(
                "b",
                parsed(vec![
                    RawRecord::new(0, "A", f64::NAN),
                    RawRecord::new(150, "A", 1.0),
                    RawRecord::new(300, "A", 1.0),
                ]),
            )
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.row_errors.len(), 2);
        assert_eq!(out.row_errors[0].kind, ParseErrorKind::NonFinite);
        assert!(matches!(out.row_errors[1].kind, ParseErrorKind::Misaligned { timestamp: 150, .. }));
    }

    #[test]
    fn test_in_batch_duplicates_keep_last() {
        let v = BatchValidator::new(300);
        let out = v
            .validate(
                "b",
                parsed(vec![
                    RawRecord::new(0, "A", 1.0),
                    RawRecord::new(0, "B", 7.0),
                    RawRecord::new(0, "A", 2.0),
                ]),
            )
            .unwrap();
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].value, 2.0);
    }

    #[test]
    fn test_all_rows_invalid_rejects_batch() {
        let v = BatchValidator::new(300);
        let err = v
            .validate("b", parsed(vec![RawRecord::new(1, "A", 1.0), RawRecord::new(2, "A", 1.0)]))
            .unwrap_err();
        assert_eq!(err, ValidationError::NoValidRows { rows: 2 });
    }

    #[test]
    fn test_batch_without_data_rows_is_empty_not_rejected() {
        let v = BatchValidator::new(300);
        let out = v.validate("b", ParsedBatch::default()).unwrap();
        assert!(out.records.is_empty());
    }
}
