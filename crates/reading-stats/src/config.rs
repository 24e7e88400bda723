use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};

const MAX_AVERAGE_PRECISION: u32 = 10;

/// Settings for [`crate::StatsView`] and the bundled SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsConfig {
    /// Bounded wait around the pending value source, in milliseconds.
    /// `null` leaves cancellation entirely to the source.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: Option<u64>,
    /// Decimal places kept when an average is recomputed
    #[serde(default = "default_average_precision")]
    pub average_precision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

fn default_fetch_timeout() -> Option<u64> {
    Some(2_000)
}

fn default_average_precision() -> u32 {
    2
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout(),
            average_precision: default_average_precision(),
            database_path: None,
        }
    }
}

impl StatsConfig {
    pub fn from_json_str(raw: &str) -> StatsResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> StatsResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> StatsResult<()> {
        if self.average_precision > MAX_AVERAGE_PRECISION {
            return Err(StatsError::Config(format!(
                "average_precision must be at most {}, got {}",
                MAX_AVERAGE_PRECISION, self.average_precision
            )));
        }
        if self.fetch_timeout_ms == Some(0) {
            return Err(StatsError::Config(
                "fetch_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}
