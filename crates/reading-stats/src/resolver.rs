use std::sync::Arc;

use log::debug;

use crate::error::StatsResult;
use crate::storage::DeviceStore;
use crate::types::{DeviceId, PendingRange};

/// Works out which readings of a device have not reached its aggregates.
#[derive(Clone)]
pub struct PendingRangeResolver {
    devices: Arc<dyn DeviceStore>,
}

impl PendingRangeResolver {
    pub fn new(devices: Arc<dyn DeviceStore>) -> Self {
        Self { devices }
    }

    /// Reads the device's count and latest reading afresh on every call.
    pub async fn resolve(&self, device_id: DeviceId) -> StatsResult<PendingRange> {
        let total = self.devices.total_readings_count(device_id).await?;
        let range = match self.devices.latest_reading(device_id).await? {
            Some(latest) => PendingRange::new(latest.sequence_number, total),
            None => PendingRange::synchronized(total),
        };

        debug!(
            "device {}: {} of {} readings pending",
            device_id,
            range.len(),
            total
        );
        Ok(range)
    }
}
