//! Sampling resolutions
//!
//! Every source is stored at up to two resolutions describing the same
//! physical quantity: a short-interval "fine" dataset and a long-interval
//! "coarse" one. The concrete interval lengths are per-source configuration
//! (see `DatasetSpec` in the persistence crate).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sampling resolution of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Short interval (e.g. 5 minutes), used for live/short-range queries
    Fine,
    /// Long interval (e.g. 30 minutes), used for long-range queries
    Coarse,
}

impl Resolution {
    /// All resolutions, finest first.
    pub fn all() -> &'static [Resolution] {
        &[Resolution::Fine, Resolution::Coarse]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Fine => "fine",
            Resolution::Coarse => "coarse",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fine" => Ok(Resolution::Fine),
            "coarse" => Ok(Resolution::Coarse),
            other => Err(format!("unknown resolution: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("fine".parse::<Resolution>().unwrap(), Resolution::Fine);
        assert_eq!("COARSE".parse::<Resolution>().unwrap(), Resolution::Coarse);
        assert!("hourly".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_resolution_serialization() {
        let json = serde_json::to_string(&Resolution::Coarse).unwrap();
        assert_eq!(json, "\"coarse\"");
    }

    #[test]
    fn test_resolution_ordering() {
        assert!(Resolution::Fine < Resolution::Coarse);
        assert_eq!(Resolution::all().len(), 2);
    }
}
