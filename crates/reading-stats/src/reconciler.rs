//! Read-time merge of a persisted aggregate with pending readings.
//!
//! Nothing here touches storage. Every function takes the persisted row and
//! whatever pending values could be fetched, and returns a fresh view.

use log::debug;

use crate::source::PendingFetch;
use crate::types::{MetricSeries, PendingRange, StatsSnapshot};

pub const DEFAULT_AVERAGE_PRECISION: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct AggregateReconciler {
    average_precision: u32,
}

impl Default for AggregateReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_AVERAGE_PRECISION)
    }
}

impl AggregateReconciler {
    pub fn new(average_precision: u32) -> Self {
        Self { average_precision }
    }

    pub fn reconcile(
        &self,
        persisted: &MetricSeries,
        range: PendingRange,
        pending: &PendingFetch<f64>,
    ) -> StatsSnapshot {
        StatsSnapshot {
            average: self.average(persisted.average, range, pending),
            maximum: merge_maximum(persisted.maximum, pending.values()),
            minimum: merge_minimum(persisted.minimum, pending.values()),
        }
    }

    /// Reweights the persisted average by the readings it is assumed to
    /// cover and folds in the pending sum.
    ///
    /// A failed fetch contributes a sum of zero while the denominator still
    /// counts the readings that could not be fetched, so the result drifts
    /// below the true average until the batch process catches up. Callers
    /// relying on the pre-failure value must check the fetch outcome
    /// themselves.
    pub fn average(
        &self,
        persisted_average: f64,
        range: PendingRange,
        pending: &PendingFetch<f64>,
    ) -> f64 {
        if range.is_empty() {
            return persisted_average;
        }

        // `end` is the total, so a zero total already returned as an empty
        // range above. Unreachable today; the division below needs it.
        let total = range.total_readings_count();
        if total == 0 {
            debug!("no readings recorded, keeping persisted average");
            return persisted_average;
        }

        if let PendingFetch::Failed(failure) = pending {
            debug!(
                "recomputing average over {} readings without {} pending values: {}",
                total,
                range.len(),
                failure
            );
        }

        let persisted_count = range.persisted_count() as f64;
        let sum: f64 = pending.values().iter().sum();
        let average = ((persisted_average * persisted_count) + sum) / total as f64;

        round_half_away_from_zero(average, self.average_precision)
    }
}

pub fn merge_maximum(persisted: f64, values: &[f64]) -> f64 {
    values.iter().copied().fold(persisted, f64::max)
}

pub fn merge_minimum(persisted: f64, values: &[f64]) -> f64 {
    values.iter().copied().fold(persisted, f64::min)
}

/// `f64::round` rounds halfway cases away from zero.
pub fn round_half_away_from_zero(value: f64, decimal_places: u32) -> f64 {
    let factor = 10_f64.powi(decimal_places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::{
        merge_maximum, merge_minimum, round_half_away_from_zero, AggregateReconciler,
    };
    use crate::error::FetchFailure;
    use crate::source::PendingFetch;
    use crate::types::{DeviceId, Metric, MetricSeries, PendingRange};

    fn persisted(average: f64, maximum: f64, minimum: f64) -> MetricSeries {
        MetricSeries {
            device_id: DeviceId::new(1),
            metric: Metric::Temperature,
            average,
            maximum,
            minimum,
        }
    }

    #[test]
    fn merges_pending_values_into_the_average() {
        let reconciler = AggregateReconciler::default();
        let view = reconciler.reconcile(
            &persisted(20.0, 25.0, 15.0),
            PendingRange::new(8, 10),
            &PendingFetch::Values(vec![30.0, 40.0]),
        );

        assert_eq!(view.average, 23.0);
        assert_eq!(view.maximum, 40.0);
        assert_eq!(view.minimum, 15.0);
    }

    #[test]
    fn failed_fetch_biases_the_average_downward() {
        let reconciler = AggregateReconciler::default();
        let view = reconciler.reconcile(
            &persisted(20.0, 25.0, 15.0),
            PendingRange::new(8, 10),
            &PendingFetch::Failed(FetchFailure::Unavailable("queue offline".to_string())),
        );

        assert_eq!(view.average, 16.0);
        assert_eq!(view.maximum, 25.0);
        assert_eq!(view.minimum, 15.0);
    }

    #[test]
    fn synchronized_range_keeps_the_persisted_average_bit_for_bit() {
        let reconciler = AggregateReconciler::default();
        let average = 21.123456789;
        let view = reconciler.reconcile(
            &persisted(average, 30.0, 10.0),
            PendingRange::synchronized(42),
            &PendingFetch::Values(Vec::new()),
        );

        assert_eq!(view.average.to_bits(), average.to_bits());
        assert_eq!(view.maximum, 30.0);
        assert_eq!(view.minimum, 10.0);
    }

    #[test]
    fn device_without_readings_keeps_the_persisted_view() {
        let reconciler = AggregateReconciler::default();
        let series = persisted(19.987, 30.0, 10.0);
        let view = reconciler.reconcile(
            &series,
            PendingRange { start: 0, end: 0 },
            &PendingFetch::Failed(FetchFailure::QueueMiss(1)),
        );

        assert_eq!(view, series.snapshot());
    }

    #[test]
    fn recomputed_average_is_rounded_to_two_places() {
        let reconciler = AggregateReconciler::default();
        let average = reconciler.average(
            10.0,
            PendingRange::new(2, 3),
            &PendingFetch::Values(vec![11.0]),
        );
        // (20 + 11) / 3 = 10.333...
        assert_eq!(average, 10.33);

        let precise = AggregateReconciler::new(4).average(
            10.0,
            PendingRange::new(2, 3),
            &PendingFetch::Values(vec![11.0]),
        );
        assert_eq!(precise, 10.3333);
    }

    #[test]
    fn rounding_moves_halfway_cases_away_from_zero() {
        assert_eq!(round_half_away_from_zero(2.5, 0), 3.0);
        assert_eq!(round_half_away_from_zero(-2.5, 0), -3.0);
        assert_eq!(round_half_away_from_zero(0.125, 2), 0.13);
        assert_eq!(round_half_away_from_zero(-0.125, 2), -0.13);
    }

    #[test]
    fn extremes_only_widen_with_pending_values() {
        let values = [12.0, 31.5, 18.0];
        assert!(merge_maximum(30.0, &values) >= 30.0);
        assert!(merge_minimum(14.0, &values) <= 14.0);
        assert_eq!(merge_maximum(30.0, &values), 31.5);
        assert_eq!(merge_minimum(14.0, &values), 12.0);
        assert_eq!(merge_maximum(30.0, &[]), 30.0);
        assert_eq!(merge_minimum(14.0, &[]), 14.0);
    }
}
