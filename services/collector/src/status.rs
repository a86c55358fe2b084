//! Per-source health for the `GetStatus` entry point
//!
//! Updated by the scheduler after every collector outcome, read by the
//! gateway. Aggregate counters are plain atomics; per-source detail sits
//! behind one short-lived mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::collector::RunReport;

/// Health of one collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub watermark: Option<i64>,
    pub error_count: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
    pub rows_appended_total: u64,
    pub rows_skipped_total: u64,
}

pub struct StatusRegistry {
    sources: Mutex<BTreeMap<String, SourceStatus>>,
    pub cycles_completed: AtomicU64,
    pub runs_succeeded: AtomicU64,
    pub runs_failed: AtomicU64,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(BTreeMap::new()),
            cycles_completed: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
        }
    }

    fn with_source<R>(&self, name: &str, f: impl FnOnce(&mut SourceStatus) -> R) -> R {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        f(sources.entry(name.to_string()).or_default())
    }

    /// Make a source visible before its first run.
    pub fn register(&self, name: &str, watermark: Option<i64>) {
        self.with_source(name, |s| {
            if s.watermark.is_none() {
                s.watermark = watermark;
            }
        });
    }

    pub fn record_success(&self, name: &str, report: &RunReport, at: DateTime<Utc>) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        self.with_source(name, |s| {
            s.last_attempt = Some(at);
            s.last_success = Some(at);
            s.consecutive_failures = 0;
            if report.watermark_after.is_some() {
                s.watermark = report.watermark_after;
            }
            s.rows_appended_total += report.rows_appended as u64;
            s.rows_skipped_total += report.rows_skipped as u64;
        });
    }

    pub fn record_failure(&self, name: &str, message: &str, at: DateTime<Utc>) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.with_source(name, |s| {
            s.last_attempt = Some(at);
            s.error_count += 1;
            s.consecutive_failures += 1;
            s.last_error = Some(message.to_string());
        });
    }

    /// A run that was skipped still counts as an attempt but not an error.
    pub fn record_skipped(&self, name: &str, at: DateTime<Utc>) {
        self.with_source(name, |s| s.last_attempt = Some(at));
    }

    pub fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> Option<SourceStatus> {
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, SourceStatus> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Export aggregate counters as a BTreeMap.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("cycles_completed".to_string(), self.cycles_completed.load(Ordering::Relaxed));
        m.insert("runs_succeeded".to_string(), self.runs_succeeded.load(Ordering::Relaxed));
        m.insert("runs_failed".to_string(), self.runs_failed.load(Ordering::Relaxed));
        m
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
