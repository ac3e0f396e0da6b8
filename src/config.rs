//! Runtime settings.
//!
//! Defaults, then an optional JSON settings file, then command-line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::DEFAULT_MAX_DATA_POINTS;
use crate::tail::DEFAULT_BACKFILL_BYTES;

pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Polling cadence in milliseconds.
    pub update_interval: u64,
    /// Samples kept per chart.
    pub max_data_points: usize,
    /// Bytes replayed from the end of a log when monitoring starts.
    pub backfill_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL_MS,
            max_data_points: DEFAULT_MAX_DATA_POINTS,
            backfill_bytes: DEFAULT_BACKFILL_BYTES,
        }
    }
}

/// Values given on the command line, if any.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub update_interval: Option<u64>,
    pub max_data_points: Option<usize>,
    pub backfill_bytes: Option<u64>,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the effective settings and checks them.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut settings = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(v) = overrides.update_interval {
            settings.update_interval = v;
        }
        if let Some(v) = overrides.max_data_points {
            settings.max_data_points = v;
        }
        if let Some(v) = overrides.backfill_bytes {
            settings.backfill_bytes = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval == 0 {
            return Err(ConfigError::Zero("updateInterval"));
        }
        if self.max_data_points == 0 {
            return Err(ConfigError::Zero("maxDataPoints"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.update_interval)
    }
}
