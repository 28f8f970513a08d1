//! Snapshots handed to the publisher and the outbound queue

use serde::{Deserialize, Serialize};

use crate::battery::BatteryTier;
use crate::config::{CountingMode, DeviceConfig, OperatingMode};
use crate::sensors::SensorSample;
use crate::status::{ChargeState, RuntimeStatus};

/// Counts and measurements for one reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub timestamp: u32,
    pub hourly_count: u32,
    pub daily_count: u32,
    pub hourly_occupancy_secs: u32,
    pub daily_occupancy_secs: u32,
    pub occupied: bool,
    pub battery_soc: u8,
    pub temperature_dc: i16,
    pub alert_code: i8,
    pub sensor_raw: Option<i32>,
}

impl DataSnapshot {
    pub fn capture(status: &RuntimeStatus, sample: Option<SensorSample>, now: u32) -> Self {
        Self {
            timestamp: now,
            hourly_count: status.hourly_count,
            daily_count: status.daily_count,
            hourly_occupancy_secs: status.hourly_occupancy_secs,
            daily_occupancy_secs: status.daily_occupancy_secs,
            occupied: status.occupied,
            battery_soc: status.battery_soc,
            temperature_dc: status.temperature_dc,
            alert_code: status.alert.raw_code(),
            sensor_raw: sample.map(|s| s.raw),
        }
    }
}

/// Device health as seen by the remote operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: u32,
    pub operating_mode: OperatingMode,
    pub counting_mode: CountingMode,
    pub battery_tier: BatteryTier,
    pub battery_soc: u8,
    pub charge_state: ChargeState,
    pub temperature_dc: i16,
    pub signal_quality: u8,
    pub alert_code: i8,
    pub alert_timestamp: u32,
    pub reset_count: u8,
    pub pending_events: u32,
    pub sensor_type: u8,
    pub sensor_healthy: bool,
}

impl StatusSnapshot {
    pub fn capture(
        config: &DeviceConfig,
        status: &RuntimeStatus,
        pending_events: u32,
        sensor_healthy: bool,
        now: u32,
    ) -> Self {
        Self {
            timestamp: now,
            operating_mode: config.operating_mode(),
            counting_mode: config.counting_mode(),
            battery_tier: status.battery_tier,
            battery_soc: status.battery_soc,
            charge_state: status.charge_state,
            temperature_dc: status.temperature_dc,
            signal_quality: status.signal_quality,
            alert_code: status.alert.raw_code(),
            alert_timestamp: status.alert.timestamp(),
            reset_count: config.reset_count(),
            pending_events,
            sensor_type: config.sensor_type(),
            sensor_healthy,
        }
    }
}

/// Items placed on the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundEvent {
    Report(DataSnapshot),
}
