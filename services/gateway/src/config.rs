//! Gateway configuration
//!
//! One JSON document configures the whole process: the store, the collection
//! schedule, the query planner and cache, and one entry per upstream source.
//! Every section has defaults, so an empty object (or no file at all) yields a
//! runnable config.

use collector::directory::DirectorySourceConfig;
use collector::{RetryPolicy, SchedulerConfig};
use persistence::{DatasetSpec, StoreConfig};
use query_engine::{CacheConfig, PlannerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::ids::{DatasetKey, SourceId};
use types::resolution::Resolution;

pub const CONFIG_ENV: &str = "GRIDWATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One collector: an upstream drop directory feeding one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Collector name, unique across the process
    pub name: String,
    pub source: SourceId,
    pub resolution: Resolution,
    pub directory: DirectorySourceConfig,
    /// Overrides the process-wide retry policy
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl SourceConfig {
    pub fn dataset(&self) -> DatasetSpec {
        DatasetSpec::new(
            DatasetKey::new(self.source.clone(), self.resolution),
            self.directory.interval_secs,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreConfig,
    /// `[{"entity_id", "category"}]` JSON file
    pub dimensions_path: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    pub planner: PlannerConfig,
    pub cache: CacheConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreConfig::default(),
            dimensions_path: None,
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            planner: PlannerConfig::default(),
            cache: CacheConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from `$GRIDWATCH_CONFIG`, else the first CLI argument, else
    /// defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(|| std::env::args_os().nth(1).map(PathBuf::from));
        match path {
            Some(path) => Self::from_file(&path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.retry.validate().map_err(ConfigError::Invalid)?;
        self.planner.validate().map_err(ConfigError::Invalid)?;
        self.cache.validate().map_err(ConfigError::Invalid)?;

        let mut names = HashSet::new();
        let mut datasets = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name {:?}",
                    source.name
                )));
            }
            if !datasets.insert((source.source.clone(), source.resolution)) {
                return Err(ConfigError::Invalid(format!(
                    "dataset {}/{} is fed by more than one source",
                    source.source, source.resolution
                )));
            }
            if source.directory.interval_secs <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "source {:?}: interval_secs must be positive",
                    source.name
                )));
            }
            if let Some(retry) = &source.retry {
                retry
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("source {:?}: {e}", source.name)))?;
            }
        }
        Ok(())
    }
}
