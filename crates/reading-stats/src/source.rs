use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;

use crate::error::FetchFailure;
use crate::types::{DeviceId, Metric, PendingRange, Reading, ReadingValues};

/// Where readings wait between being counted against a device and being
/// folded into its aggregates.
#[async_trait]
pub trait PendingValueSource: Send + Sync {
    /// Values of every reading covered by `range`, in any order.
    async fn fetch(
        &self,
        device_id: DeviceId,
        range: PendingRange,
    ) -> Result<Vec<ReadingValues>, FetchFailure>;
}

/// Outcome of asking a [`PendingValueSource`] for pending values.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingFetch<T = ReadingValues> {
    Values(Vec<T>),
    Failed(FetchFailure),
}

impl<T> PendingFetch<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Values to fold in; a failed fetch contributes none.
    pub fn values(&self) -> &[T] {
        match self {
            Self::Values(values) => values,
            Self::Failed(_) => &[],
        }
    }
}

impl PendingFetch<ReadingValues> {
    pub fn for_metric(&self, metric: Metric) -> PendingFetch<f64> {
        match self {
            Self::Values(values) => {
                PendingFetch::Values(values.iter().map(|value| value.get(metric)).collect())
            }
            Self::Failed(failure) => PendingFetch::Failed(failure.clone()),
        }
    }
}

impl<T> From<Result<Vec<T>, FetchFailure>> for PendingFetch<T> {
    fn from(result: Result<Vec<T>, FetchFailure>) -> Self {
        match result {
            Ok(values) => Self::Values(values),
            Err(failure) => Self::Failed(failure),
        }
    }
}

/// In-memory buffer of readings that have been counted but not yet
/// aggregated, keyed by device and sequence number.
#[derive(Debug, Default)]
pub struct PendingReadingQueue {
    entries: RwLock<HashMap<DeviceId, BTreeMap<u64, ReadingValues>>>,
}

impl PendingReadingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reading: &Reading) {
        self.entries
            .write()
            .entry(reading.device_id)
            .or_default()
            .insert(reading.sequence_number, reading.values);
    }

    /// Drops every queued reading of `device_id` numbered at or below
    /// `sequence_number`. Returns how many were removed.
    pub fn drain_through(&self, device_id: DeviceId, sequence_number: u64) -> usize {
        let mut entries = self.entries.write();
        let Some(queue) = entries.get_mut(&device_id) else {
            return 0;
        };

        let kept = queue.split_off(&(sequence_number.saturating_add(1)));
        let removed = queue.len();
        *queue = kept;
        if queue.is_empty() {
            entries.remove(&device_id);
        }
        removed
    }

    pub fn len(&self, device_id: DeviceId) -> usize {
        self.entries
            .read()
            .get(&device_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, device_id: DeviceId) -> bool {
        self.len(device_id) == 0
    }
}

#[async_trait]
impl PendingValueSource for PendingReadingQueue {
    async fn fetch(
        &self,
        device_id: DeviceId,
        range: PendingRange,
    ) -> Result<Vec<ReadingValues>, FetchFailure> {
        let entries = self.entries.read();
        let queue = entries.get(&device_id);
        let queued = queue.map_or(0, BTreeMap::len);

        // The range length comes from the device's count, so it can be far
        // larger than anything held here. The first gap lies within the
        // first `queued + 1` numbers.
        if range.len() > queued as u64 {
            let missing = range
                .sequence_numbers()
                .find(|sequence_number| {
                    !queue.is_some_and(|queue| queue.contains_key(sequence_number))
                })
                .unwrap_or(range.end);
            return Err(FetchFailure::QueueMiss(missing));
        }

        let mut values = Vec::with_capacity(range.len() as usize);
        for sequence_number in range.sequence_numbers() {
            let value = queue
                .and_then(|queue| queue.get(&sequence_number))
                .ok_or(FetchFailure::QueueMiss(sequence_number))?;
            if !value.is_finite() {
                return Err(FetchFailure::Malformed(sequence_number));
            }
            values.push(*value);
        }

        Ok(values)
    }
}

/// Puts an upper bound on how long a wrapped source may take.
pub struct TimeoutValueSource {
    inner: Arc<dyn PendingValueSource>,
    timeout: Duration,
}

impl TimeoutValueSource {
    pub fn new(inner: Arc<dyn PendingValueSource>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl PendingValueSource for TimeoutValueSource {
    async fn fetch(
        &self,
        device_id: DeviceId,
        range: PendingRange,
    ) -> Result<Vec<ReadingValues>, FetchFailure> {
        match tokio::time::timeout(self.timeout, self.inner.fetch(device_id, range)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "pending fetch for device {} exceeded {:?}",
                    device_id, self.timeout
                );
                Err(FetchFailure::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}
