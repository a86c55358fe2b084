//! Durable per-dataset watermark.
//!
//! The watermark is the greatest record timestamp known to be fully ingested
//! for a dataset. It only ever moves forward: every write stores
//! `max(current, proposed)`.

use crate::segment::{sync_dir, FsyncPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const WATERMARK_FILE: &str = "watermark.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkFile {
    pub timestamp: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Watermark {
    path: PathBuf,
    current: Option<i64>,
    fsync: FsyncPolicy,
}

impl Watermark {
    /// Load the watermark stored in `dir`, if any.
    pub fn load(dir: &Path, fsync: FsyncPolicy) -> io::Result<Self> {
        let path = dir.join(WATERMARK_FILE);
        let current = if path.exists() {
            let raw = fs::read(&path)?;
            let file: WatermarkFile = serde_json::from_slice(&raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Some(file.timestamp)
        } else {
            None
        };
        Ok(Self {
            path,
            current,
            fsync,
        })
    }

    pub fn get(&self) -> Option<i64> {
        self.current
    }

    /// Advance to `max(current, timestamp)` and persist. Returns the
    /// effective watermark.
    pub fn advance(&mut self, timestamp: i64) -> io::Result<i64> {
        let next = match self.current {
            Some(cur) if cur >= timestamp => return Ok(cur),
            _ => timestamp,
        };
        self.persist(next)?;
        self.current = Some(next);
        Ok(next)
    }

    fn persist(&self, timestamp: i64) -> io::Result<()> {
        let body = WatermarkFile {
            timestamp,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&json)?;
            if self.fsync == FsyncPolicy::EveryAppend {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &self.path)?;
        if self.fsync == FsyncPolicy::EveryAppend {
            if let Some(parent) = self.path.parent() {
                sync_dir(parent)?;
            }
        }
        Ok(())
    }
}
