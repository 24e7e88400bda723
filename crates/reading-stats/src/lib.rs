//! Current average, maximum and minimum per device metric.
//!
//! A batch process periodically folds readings into one persisted
//! [`MetricSeries`] per device and metric. Readings that arrived since the
//! last run are merged in at read time by [`StatsView`], which never writes
//! back to the aggregate store.

pub mod config;
pub mod error;
pub mod reconciler;
pub mod resolver;
pub mod source;
pub mod storage;
pub mod types;
pub mod view;

pub use config::StatsConfig;
pub use error::{FetchFailure, StatsError, StatsResult};
pub use reconciler::{round_half_away_from_zero, AggregateReconciler};
pub use resolver::PendingRangeResolver;
pub use source::{PendingFetch, PendingReadingQueue, PendingValueSource, TimeoutValueSource};
pub use storage::{DeviceStore, MetricSeriesStore, SqliteStatsStore};
pub use types::{
    DeviceId, DeviceStats, Metric, MetricSeries, PendingRange, Reading, ReadingValues,
    StatsSnapshot, Statistic,
};
pub use view::StatsView;
