use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StatsError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl DeviceId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DeviceId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Metrics tracked for every reading a device emits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    BatteryCharge,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Self::Temperature, Self::Humidity, Self::BatteryCharge];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::BatteryCharge => "battery_charge",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "temperature" => Some(Self::Temperature),
            "humidity" => Some(Self::Humidity),
            "battery_charge" => Some(Self::BatteryCharge),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = StatsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_db(value).ok_or_else(|| StatsError::UnknownMetric(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Average,
    Maximum,
    Minimum,
}

impl Statistic {
    pub const ALL: [Statistic; 3] = [Self::Average, Self::Maximum, Self::Minimum];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Statistic {
    type Err = StatsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "average" => Ok(Self::Average),
            "maximum" => Ok(Self::Maximum),
            "minimum" => Ok(Self::Minimum),
            other => Err(StatsError::UnknownStatistic(other.to_string())),
        }
    }
}

/// One value per tracked metric.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadingValues {
    pub temperature: f64,
    pub humidity: f64,
    pub battery_charge: f64,
}

impl ReadingValues {
    pub fn new(temperature: f64, humidity: f64, battery_charge: f64) -> Self {
        Self {
            temperature,
            humidity,
            battery_charge,
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::BatteryCharge => self.battery_charge,
        }
    }

    pub fn is_finite(&self) -> bool {
        Metric::ALL.iter().all(|metric| self.get(*metric).is_finite())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub device_id: DeviceId,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub values: ReadingValues,
}

/// Aggregate row written by the batch process for one (device, metric) pair.
///
/// The core only ever reads these; see [`crate::StatsView::persist`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSeries {
    pub device_id: DeviceId,
    pub metric: Metric,
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
}

impl MetricSeries {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            average: self.average,
            maximum: self.maximum,
            minimum: self.minimum,
        }
    }
}

/// Average, maximum and minimum of one metric as seen by a caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
}

impl StatsSnapshot {
    pub fn get(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Average => self.average,
            Statistic::Maximum => self.maximum,
            Statistic::Minimum => self.minimum,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStats {
    pub device_id: DeviceId,
    pub temperature: StatsSnapshot,
    pub humidity: StatsSnapshot,
    pub battery_charge: StatsSnapshot,
}

impl DeviceStats {
    pub fn get(&self, metric: Metric) -> &StatsSnapshot {
        match metric {
            Metric::Temperature => &self.temperature,
            Metric::Humidity => &self.humidity,
            Metric::BatteryCharge => &self.battery_charge,
        }
    }
}

/// Half-open span `[start, end)` of sequence numbers recorded by a device but
/// not yet folded into its persisted aggregates.
///
/// `end` is always the device's total readings count at resolution time, so
/// the count of readings already aggregated is `end - len()`. That count is
/// re-derived on every read and is never stored; two reads of the same
/// persisted average can therefore be weighted differently if readings
/// arrive in between.
///
/// Sequence numbers start at 1 and the range covers the readings numbered
/// `start + 1` through `end`, one past each end of the literal `start..end`.
/// The last logged reading (`start`) is already aggregated, and the newest
/// counted reading (`end`) is the one most likely still queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingRange {
    pub start: u64,
    pub end: u64,
}

impl PendingRange {
    pub fn new(last_sequence_number: u64, total_readings_count: u64) -> Self {
        Self {
            start: last_sequence_number.min(total_readings_count),
            end: total_readings_count,
        }
    }

    pub fn synchronized(total_readings_count: u64) -> Self {
        Self {
            start: total_readings_count,
            end: total_readings_count,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence numbers start at 1, so a range `[start, end)` covers the
    /// readings numbered `start + 1` through `end`.
    pub fn contains(&self, sequence_number: u64) -> bool {
        sequence_number > self.start && sequence_number <= self.end
    }

    pub fn total_readings_count(&self) -> u64 {
        self.end
    }

    pub fn persisted_count(&self) -> u64 {
        self.end - self.len()
    }

    pub fn sequence_numbers(&self) -> std::ops::RangeInclusive<u64> {
        if self.is_empty() {
            return std::ops::RangeInclusive::new(1, 0);
        }
        (self.start + 1)..=self.end
    }
}
