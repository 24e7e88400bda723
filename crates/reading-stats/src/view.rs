use std::sync::Arc;

use log::{debug, warn};

use crate::config::StatsConfig;
use crate::error::{StatsError, StatsResult};
use crate::reconciler::AggregateReconciler;
use crate::resolver::PendingRangeResolver;
use crate::source::{PendingFetch, PendingValueSource, TimeoutValueSource};
use crate::storage::{DeviceStore, MetricSeriesStore};
use crate::types::{DeviceId, DeviceStats, Metric, MetricSeries, PendingRange, StatsSnapshot};

/// Current statistics for a device, merging persisted aggregates with
/// readings the batch process has not folded in yet.
///
/// Every call reads fresh state from the stores; nothing is cached and
/// nothing is written.
pub struct StatsView {
    series: Arc<dyn MetricSeriesStore>,
    resolver: PendingRangeResolver,
    source: Arc<dyn PendingValueSource>,
    reconciler: AggregateReconciler,
}

impl StatsView {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        series: Arc<dyn MetricSeriesStore>,
        source: Arc<dyn PendingValueSource>,
    ) -> Self {
        Self::with_config(devices, series, source, &StatsConfig::default())
    }

    pub fn with_config(
        devices: Arc<dyn DeviceStore>,
        series: Arc<dyn MetricSeriesStore>,
        source: Arc<dyn PendingValueSource>,
        config: &StatsConfig,
    ) -> Self {
        let source: Arc<dyn PendingValueSource> = match config.fetch_timeout() {
            Some(timeout) => Arc::new(TimeoutValueSource::new(source, timeout)),
            None => source,
        };

        Self {
            series,
            resolver: PendingRangeResolver::new(devices),
            source,
            reconciler: AggregateReconciler::new(config.average_precision),
        }
    }

    pub async fn current_view(
        &self,
        device_id: DeviceId,
        metric: Metric,
    ) -> StatsResult<StatsSnapshot> {
        let persisted = self.series.find(device_id, metric).await?;
        let range = self.resolver.resolve(device_id).await?;
        let pending = self.fetch_pending(device_id, range).await;

        Ok(self
            .reconciler
            .reconcile(&persisted, range, &pending.for_metric(metric)))
    }

    /// Views of every metric from a single range resolution and fetch.
    pub async fn current_views(&self, device_id: DeviceId) -> StatsResult<DeviceStats> {
        let persisted = self.find_all(device_id).await?;
        let range = self.resolver.resolve(device_id).await?;
        let pending = self.fetch_pending(device_id, range).await;

        let [temperature, humidity, battery_charge] = persisted.map(|series| {
            self.reconciler
                .reconcile(&series, range, &pending.for_metric(series.metric))
        });

        Ok(DeviceStats {
            device_id,
            temperature,
            humidity,
            battery_charge,
        })
    }

    /// The stored aggregate as the batch process left it.
    pub async fn persisted(
        &self,
        device_id: DeviceId,
        metric: Metric,
    ) -> StatsResult<StatsSnapshot> {
        Ok(self.series.find(device_id, metric).await?.snapshot())
    }

    pub async fn persisted_all(&self, device_id: DeviceId) -> StatsResult<DeviceStats> {
        let [temperature, humidity, battery_charge] =
            self.find_all(device_id).await?.map(|series| series.snapshot());

        Ok(DeviceStats {
            device_id,
            temperature,
            humidity,
            battery_charge,
        })
    }

    /// Aggregates are owned by the batch process; writes through the view
    /// always fail.
    pub fn persist(&self, series: &MetricSeries) -> StatsResult<()> {
        Err(StatsError::ReadOnlyRecord {
            device_id: series.device_id,
            metric: series.metric,
        })
    }

    async fn find_all(&self, device_id: DeviceId) -> StatsResult<[MetricSeries; 3]> {
        let [temperature, humidity, battery_charge] = Metric::ALL;
        Ok([
            self.series.find(device_id, temperature).await?,
            self.series.find(device_id, humidity).await?,
            self.series.find(device_id, battery_charge).await?,
        ])
    }

    async fn fetch_pending(&self, device_id: DeviceId, range: PendingRange) -> PendingFetch {
        if range.is_empty() {
            return PendingFetch::Values(Vec::new());
        }

        match self.source.fetch(device_id, range).await {
            Ok(values) => {
                debug!(
                    "fetched {} pending values for device {}",
                    values.len(),
                    device_id
                );
                PendingFetch::Values(values)
            }
            Err(failure) => {
                warn!(
                    "pending values for device {} unavailable ({}..={}): {}",
                    device_id,
                    range.start + 1,
                    range.end,
                    failure
                );
                PendingFetch::Failed(failure)
            }
        }
    }
}
