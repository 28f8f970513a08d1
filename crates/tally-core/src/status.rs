//! Persisted runtime status
//!
//! Mutated every cycle by counting, reporting and connectivity code, and the
//! only state the error supervisor consults.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertCode, AlertSlot};
use crate::battery::{BatteryTier, tier_soc};
use crate::config::{ApplyReport, PowerSection, TEST_SOC_OVERRIDE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChargeState {
    #[default]
    Unknown,
    Discharging,
    Charging,
    Full,
    Fault,
}

/// Fault reported by the power-management chip alongside a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmicFault {
    Battery,
    Charge,
    Thermal,
}

impl PmicFault {
    pub const fn alert(self) -> AlertCode {
        match self {
            Self::Battery => AlertCode::PmicBatteryFault,
            Self::Charge => AlertCode::PmicChargeFault,
            Self::Thermal => AlertCode::PmicThermalFault,
        }
    }
}

/// One reading from the fuel gauge / power-management chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryReading {
    /// State of charge, percent
    pub soc: u8,
    pub charge: ChargeState,
    /// Enclosure temperature in tenths of a degree Celsius
    pub temperature_dc: i16,
    pub fault: Option<PmicFault>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub hourly_count: u32,
    pub daily_count: u32,
    pub last_count_time: u32,

    pub occupied: bool,
    pub occupancy_start: u32,
    pub hourly_occupancy_secs: u32,
    pub daily_occupancy_secs: u32,

    pub battery_soc: u8,
    pub charge_state: ChargeState,
    pub temperature_dc: i16,
    pub signal_quality: u8,

    pub alert: AlertSlot,
    pub battery_tier: BatteryTier,
    pub test_soc_override: Option<u8>,

    /// A firmware update was seen but not finished
    pub update_pending: bool,
}

impl RuntimeStatus {
    /// Count one detection.
    pub fn record_count(&mut self, now: u32) {
        self.hourly_count = self.hourly_count.saturating_add(1);
        self.daily_count = self.daily_count.saturating_add(1);
        self.last_count_time = now;
    }

    pub fn begin_occupancy(&mut self, now: u32) {
        self.occupied = true;
        self.occupancy_start = now;
    }

    /// Credit the open part of a running occupancy session to the current
    /// period and restart its clock, so a long session is split across the
    /// reports it spans.
    pub fn credit_open_occupancy(&mut self, now: u32) -> u32 {
        if !self.occupied {
            return 0;
        }
        let open = now.saturating_sub(self.occupancy_start);
        self.hourly_occupancy_secs = self.hourly_occupancy_secs.saturating_add(open);
        self.daily_occupancy_secs = self.daily_occupancy_secs.saturating_add(open);
        self.occupancy_start = now;
        open
    }

    /// Close the current occupancy session and return the seconds credited
    /// since it started or was last split at a report.
    pub fn end_occupancy(&mut self, now: u32) -> u32 {
        let session = now.saturating_sub(self.occupancy_start);
        self.occupied = false;
        self.hourly_occupancy_secs = self.hourly_occupancy_secs.saturating_add(session);
        self.daily_occupancy_secs = self.daily_occupancy_secs.saturating_add(session);
        self.hourly_count = self.hourly_count.saturating_add(1);
        self.daily_count = self.daily_count.saturating_add(1);
        self.last_count_time = now;
        session
    }

    /// Start a new reporting period.
    pub fn reset_hourly(&mut self) {
        self.hourly_count = 0;
        self.hourly_occupancy_secs = 0;
    }

    /// Start a new local calendar day.
    pub fn reset_daily(&mut self) {
        info!(
            " Daily rollover: {} counts, {}s occupied",
            self.daily_count, self.daily_occupancy_secs
        );
        self.daily_count = 0;
        self.daily_occupancy_secs = 0;
    }

    pub fn raise_alert(&mut self, alert: AlertCode, now: u32) -> bool {
        self.alert.raise(alert, now)
    }

    pub fn alert(&self) -> Option<AlertCode> {
        self.alert.current()
    }

    /// Store a fresh battery reading and recompute the tier.
    pub fn update_battery(&mut self, reading: &BatteryReading, now: u32) {
        self.battery_soc = reading.soc.min(100);
        self.charge_state = reading.charge;
        self.temperature_dc = reading.temperature_dc;

        let soc = tier_soc(self.battery_soc, self.test_soc_override);
        let tier = self.battery_tier.next(soc);
        if tier != self.battery_tier {
            info!(
                " Battery tier {} -> {} at {}%",
                self.battery_tier.label(),
                tier.label(),
                soc
            );
            self.battery_tier = tier;
        } else {
            debug!(" Battery {}%, tier {}", soc, tier.label());
        }

        if let Some(fault) = reading.fault {
            self.raise_alert(fault.alert(), now);
        }
    }

    /// Apply the power section of a remote configuration.
    pub fn apply_remote_power(&mut self, power: &PowerSection, report: &mut ApplyReport) {
        if power.clear_test_soc_override == Some(true) {
            self.test_soc_override = None;
            report.record(Ok(()));
        }
        if let Some(soc) = power.test_soc_override {
            report.record(
                TEST_SOC_OVERRIDE
                    .check(u32::from(soc))
                    .map(|v| self.test_soc_override = Some(v as u8)),
            );
        }
    }

    pub fn sanitize(&mut self) -> Option<&'static str> {
        let mut first = None;
        if self.battery_soc > 100 {
            self.battery_soc = 100;
            first.get_or_insert("battery_soc");
        }
        if self.test_soc_override.is_some_and(|v| v > 100) {
            self.test_soc_override = None;
            first.get_or_insert("test_soc_override");
        }
        if self.alert.raw_code() != 0 && self.alert.current().is_none() {
            self.alert.sanitize();
            first.get_or_insert("alert");
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_resets_only_hourly() {
        let mut status = RuntimeStatus::default();
        status.record_count(10);
        assert_eq!((status.hourly_count, status.daily_count), (1, 1));

        status.reset_hourly();
        assert_eq!((status.hourly_count, status.daily_count), (0, 1));

        status.record_count(20);
        status.reset_daily();
        assert_eq!((status.hourly_count, status.daily_count), (1, 0));
    }

    #[test]
    fn test_occupancy_session_accumulates() {
        let mut status = RuntimeStatus::default();
        status.begin_occupancy(1_000);
        assert_eq!(status.end_occupancy(1_500), 500);
        assert!(!status.occupied);
        assert_eq!(status.hourly_occupancy_secs, 500);
        assert_eq!(status.daily_occupancy_secs, 500);
    }

    #[test]
    fn test_open_session_split_across_reports() {
        let mut status = RuntimeStatus::default();
        status.begin_occupancy(1_000);
        assert_eq!(status.credit_open_occupancy(4_600), 3_600);
        assert!(status.occupied);
        assert_eq!(status.hourly_occupancy_secs, 3_600);

        status.reset_hourly();
        assert_eq!(status.end_occupancy(5_000), 400);
        assert_eq!(status.hourly_occupancy_secs, 400);
        assert_eq!(status.daily_occupancy_secs, 4_000);
        assert_eq!(status.daily_count, 1);

        // Nothing to credit once the session is closed
        assert_eq!(status.credit_open_occupancy(6_000), 0);
        assert_eq!(status.daily_occupancy_secs, 4_000);
    }

    #[test]
    fn test_power_section_validates_override() {
        let mut status = RuntimeStatus::default();
        let mut report = ApplyReport::default();
        let power = PowerSection {
            test_soc_override: Some(140),
            clear_test_soc_override: None,
        };
        status.apply_remote_power(&power, &mut report);
        assert_eq!(status.test_soc_override, None);
        assert!(!report.is_clean());

        let power = PowerSection {
            test_soc_override: Some(40),
            clear_test_soc_override: None,
        };
        status.apply_remote_power(&power, &mut report);
        assert_eq!(status.test_soc_override, Some(40));
    }

    #[test]
    fn test_tier_uses_override_and_faults_raise_alerts() {
        let mut status = RuntimeStatus::default();
        status.test_soc_override = Some(25);
        let reading = BatteryReading {
            soc: 95,
            charge: ChargeState::Discharging,
            temperature_dc: 215,
            fault: Some(PmicFault::Thermal),
        };
        status.update_battery(&reading, 42);
        assert_eq!(status.battery_soc, 95);
        assert_eq!(status.battery_tier, BatteryTier::Survival);
        assert_eq!(status.alert(), Some(AlertCode::PmicThermalFault));
    }
}
