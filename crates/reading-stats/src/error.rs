use thiserror::Error;

use crate::types::{DeviceId, Metric};

pub type StatsResult<T> = Result<T, StatsError>;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("no persisted {metric} series for device {device_id}")]
    RecordNotFound { device_id: DeviceId, metric: Metric },

    #[error("{metric} series for device {device_id} is read-only")]
    ReadOnlyRecord { device_id: DeviceId, metric: Metric },

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("unknown statistic: {0}")]
    UnknownStatistic(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("time parse error: {0}")]
    Chrono(#[from] chrono::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage task join error: {0}")]
    Task(String),

    #[error("invalid stats data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for StatsError {
    fn from(e: serde_json::Error) -> Self {
        StatsError::Config(e.to_string())
    }
}

/// Reasons a pending value source could not return values.
///
/// These never reach callers of [`crate::StatsView`]; the reconciler treats
/// every variant as "no pending values available".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("pending fetch timed out after {0}ms")]
    Timeout(u64),

    #[error("sequence number {0} is not in the pending queue")]
    QueueMiss(u64),

    #[error("malformed pending entry at sequence number {0}")]
    Malformed(u64),

    #[error("pending source unavailable: {0}")]
    Unavailable(String),
}
