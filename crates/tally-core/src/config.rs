//! Device mode configuration and remote configuration apply
//!
//! [`DeviceConfig`] is the persisted mode configuration. It is mutated only
//! through validated setters, and its connectivity budgets are read through
//! getters that never hand out a value outside the accepted range.

use heapless::Vec;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::OpenHours;
use crate::error::ConfigError;
use crate::sensors::registry;

/// Accepted range and factory value of a numeric configuration field.
#[derive(Debug, Clone, Copy)]
pub struct FieldRange {
    pub field: &'static str,
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl FieldRange {
    pub const fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn check(&self, value: u32) -> Result<u32, ConfigError> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(ConfigError::OutOfRange {
                field: self.field,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }

    /// The stored value if sane, the fallback otherwise.
    pub const fn or_fallback(&self, value: u32) -> u32 {
        if self.contains(value) { value } else { self.default }
    }
}

pub const OPEN_HOUR: FieldRange = FieldRange {
    field: "open_hour",
    min: 0,
    max: 23,
    default: 6,
};
pub const CLOSE_HOUR: FieldRange = FieldRange {
    field: "close_hour",
    min: 0,
    max: 23,
    default: 22,
};
pub const REPORTING_INTERVAL: FieldRange = FieldRange {
    field: "reporting_interval_secs",
    min: 60,
    max: 86_400,
    default: 3_600,
};
pub const OCCUPANCY_DEBOUNCE: FieldRange = FieldRange {
    field: "occupancy_debounce_ms",
    min: 0,
    max: 3_600_000,
    default: 300_000,
};
pub const CONNECT_BUDGET: FieldRange = FieldRange {
    field: "connect_budget_secs",
    min: 30,
    max: 900,
    default: 600,
};
pub const CLOUD_DISCONNECT_BUDGET: FieldRange = FieldRange {
    field: "cloud_disconnect_budget_secs",
    min: 5,
    max: 120,
    default: 15,
};
pub const MODEM_OFF_BUDGET: FieldRange = FieldRange {
    field: "modem_off_budget_secs",
    min: 5,
    max: 120,
    default: 30,
};
pub const TEST_SOC_OVERRIDE: FieldRange = FieldRange {
    field: "test_soc_override",
    min: 0,
    max: 100,
    default: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CountingMode {
    /// Every sensor event is one count
    #[default]
    Counting,
    /// Sensor events hold an occupied state open for the debounce period
    Occupancy,
    /// No event accumulation, the sensor is sampled at report time only
    Scheduled,
}

impl CountingMode {
    pub fn from_code(code: u32) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Self::Counting),
            1 => Ok(Self::Occupancy),
            2 => Ok(Self::Scheduled),
            value => Err(ConfigError::UnknownCode {
                field: "counting_mode",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperatingMode {
    /// Online throughout open hours
    #[default]
    Connected,
    /// Sleeps between reports and connects on interval boundaries
    LowPower,
    /// Never connects on its own
    Disconnected,
}

impl OperatingMode {
    pub fn from_code(code: u32) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Self::Connected),
            1 => Ok(Self::LowPower),
            2 => Ok(Self::Disconnected),
            value => Err(ConfigError::UnknownCode {
                field: "operating_mode",
                value,
            }),
        }
    }
}

/// Persisted mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    counting_mode: CountingMode,
    operating_mode: OperatingMode,
    open_hour: u8,
    close_hour: u8,
    reporting_interval_secs: u32,
    occupancy_debounce_ms: u32,
    connect_budget_secs: u32,
    cloud_disconnect_budget_secs: u32,
    modem_off_budget_secs: u32,
    sensor_type: u8,
    reset_count: u8,
    last_report: u32,
    last_connection: u32,
    last_hook_response: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            counting_mode: CountingMode::default(),
            operating_mode: OperatingMode::default(),
            open_hour: OPEN_HOUR.default as u8,
            close_hour: CLOSE_HOUR.default as u8,
            reporting_interval_secs: REPORTING_INTERVAL.default,
            occupancy_debounce_ms: OCCUPANCY_DEBOUNCE.default,
            connect_budget_secs: CONNECT_BUDGET.default,
            cloud_disconnect_budget_secs: CLOUD_DISCONNECT_BUDGET.default,
            modem_off_budget_secs: MODEM_OFF_BUDGET.default,
            sensor_type: registry::DEFAULT_SENSOR_CODE,
            reset_count: 0,
            last_report: 0,
            last_connection: 0,
            last_hook_response: 0,
        }
    }
}

impl DeviceConfig {
    pub fn counting_mode(&self) -> CountingMode {
        self.counting_mode
    }

    /// Occupancy mode is only accepted for sensors that can hold a presence
    /// state.
    pub fn set_counting_mode(&mut self, mode: CountingMode) -> Result<(), ConfigError> {
        check_occupancy_support("counting_mode", self.sensor_type, mode)?;
        self.counting_mode = mode;
        Ok(())
    }

    pub fn operating_mode(&self) -> OperatingMode {
        self.operating_mode
    }

    pub fn set_operating_mode(&mut self, mode: OperatingMode) {
        self.operating_mode = mode;
    }

    pub fn is_connected_mode(&self) -> bool {
        self.operating_mode == OperatingMode::Connected
    }

    pub fn open_hours(&self) -> OpenHours {
        OpenHours::new(self.open_hour, self.close_hour)
    }

    pub fn set_open_hour(&mut self, hour: u8) -> Result<(), ConfigError> {
        self.open_hour = OPEN_HOUR.check(u32::from(hour))? as u8;
        Ok(())
    }

    pub fn set_close_hour(&mut self, hour: u8) -> Result<(), ConfigError> {
        self.close_hour = CLOSE_HOUR.check(u32::from(hour))? as u8;
        Ok(())
    }

    pub fn reporting_interval_secs(&self) -> u32 {
        REPORTING_INTERVAL.or_fallback(self.reporting_interval_secs)
    }

    pub fn set_reporting_interval_secs(&mut self, secs: u32) -> Result<(), ConfigError> {
        self.reporting_interval_secs = REPORTING_INTERVAL.check(secs)?;
        Ok(())
    }

    pub fn occupancy_debounce_ms(&self) -> u32 {
        OCCUPANCY_DEBOUNCE.or_fallback(self.occupancy_debounce_ms)
    }

    pub fn set_occupancy_debounce_ms(&mut self, ms: u32) -> Result<(), ConfigError> {
        self.occupancy_debounce_ms = OCCUPANCY_DEBOUNCE.check(ms)?;
        Ok(())
    }

    /// Connect-attempt budget, never outside its accepted range.
    pub fn connect_budget_secs(&self) -> u32 {
        CONNECT_BUDGET.or_fallback(self.connect_budget_secs)
    }

    pub fn set_connect_budget_secs(&mut self, secs: u32) -> Result<(), ConfigError> {
        self.connect_budget_secs = CONNECT_BUDGET.check(secs)?;
        Ok(())
    }

    /// Cloud session teardown budget, never outside its accepted range.
    pub fn cloud_disconnect_budget_secs(&self) -> u32 {
        CLOUD_DISCONNECT_BUDGET.or_fallback(self.cloud_disconnect_budget_secs)
    }

    pub fn set_cloud_disconnect_budget_secs(&mut self, secs: u32) -> Result<(), ConfigError> {
        self.cloud_disconnect_budget_secs = CLOUD_DISCONNECT_BUDGET.check(secs)?;
        Ok(())
    }

    /// Modem power-off budget, never outside its accepted range.
    pub fn modem_off_budget_secs(&self) -> u32 {
        MODEM_OFF_BUDGET.or_fallback(self.modem_off_budget_secs)
    }

    pub fn set_modem_off_budget_secs(&mut self, secs: u32) -> Result<(), ConfigError> {
        self.modem_off_budget_secs = MODEM_OFF_BUDGET.check(secs)?;
        Ok(())
    }

    pub fn sensor_type(&self) -> u8 {
        self.sensor_type
    }

    pub fn set_sensor_type(&mut self, code: u8) -> Result<(), ConfigError> {
        self.set_sensor_type_for(code, self.counting_mode)
    }

    /// Set the sensor type, validated against the counting mode it will run
    /// under.
    fn set_sensor_type_for(&mut self, code: u8, mode: CountingMode) -> Result<(), ConfigError> {
        if registry::lookup(code).is_none() {
            return Err(ConfigError::UnknownCode {
                field: "sensor_type",
                value: u32::from(code),
            });
        }
        check_occupancy_support("sensor_type", code, mode)?;
        self.sensor_type = code;
        Ok(())
    }

    pub fn reset_count(&self) -> u8 {
        self.reset_count
    }

    pub fn increment_reset_count(&mut self) {
        self.reset_count = self.reset_count.saturating_add(1);
    }

    pub fn clear_reset_count(&mut self) {
        self.reset_count = 0;
    }

    pub fn last_report(&self) -> u32 {
        self.last_report
    }

    pub fn set_last_report(&mut self, at: u32) {
        self.last_report = at;
    }

    pub fn last_connection(&self) -> u32 {
        self.last_connection
    }

    pub fn set_last_connection(&mut self, at: u32) {
        self.last_connection = at;
    }

    pub fn last_hook_response(&self) -> u32 {
        self.last_hook_response
    }

    pub fn set_last_hook_response(&mut self, at: u32) {
        self.last_hook_response = at;
    }

    /// Replace out-of-range fields with factory values. Budgets are left
    /// alone because their getters already fall back. Returns the name of the
    /// first offending field, if any.
    pub fn sanitize(&mut self) -> Option<&'static str> {
        let mut first = None;
        let mut note = |field: &'static str| {
            warn!(" Config field {} out of range, reset to default", field);
            first.get_or_insert(field);
        };

        if !OPEN_HOUR.contains(u32::from(self.open_hour)) {
            self.open_hour = OPEN_HOUR.default as u8;
            note(OPEN_HOUR.field);
        }
        if !CLOSE_HOUR.contains(u32::from(self.close_hour)) {
            self.close_hour = CLOSE_HOUR.default as u8;
            note(CLOSE_HOUR.field);
        }
        if !REPORTING_INTERVAL.contains(self.reporting_interval_secs) {
            self.reporting_interval_secs = REPORTING_INTERVAL.default;
            note(REPORTING_INTERVAL.field);
        }
        if !OCCUPANCY_DEBOUNCE.contains(self.occupancy_debounce_ms) {
            self.occupancy_debounce_ms = OCCUPANCY_DEBOUNCE.default;
            note(OCCUPANCY_DEBOUNCE.field);
        }
        if registry::lookup(self.sensor_type).is_none() {
            self.sensor_type = registry::DEFAULT_SENSOR_CODE;
            note("sensor_type");
        }
        if check_occupancy_support("counting_mode", self.sensor_type, self.counting_mode).is_err() {
            self.counting_mode = CountingMode::Counting;
            note("counting_mode");
        }
        first
    }

    /// Apply every present field of `remote`, rejecting out-of-range values
    /// one field at a time.
    pub fn apply_remote(&mut self, remote: &RemoteConfig) -> ApplyReport {
        let mut report = ApplyReport::default();

        // The sensor goes first and is checked against the counting mode the
        // remote asks for, so a sensor and mode change can arrive together.
        if let Some(sensor) = &remote.sensor {
            if let Some(code) = sensor.sensor_type {
                let target_mode = remote
                    .modes
                    .as_ref()
                    .and_then(|m| m.counting_mode)
                    .and_then(|c| CountingMode::from_code(u32::from(c)).ok())
                    .unwrap_or(self.counting_mode);
                report.record(self.set_sensor_type_for(code, target_mode));
            }
            if let Some(ms) = sensor.occupancy_debounce_ms {
                report.record(self.set_occupancy_debounce_ms(ms));
            }
        }

        if let Some(modes) = &remote.modes {
            if let Some(code) = modes.counting_mode {
                report.record(CountingMode::from_code(u32::from(code)).and_then(|m| self.set_counting_mode(m)));
            }
            if let Some(code) = modes.operating_mode {
                report.record(OperatingMode::from_code(u32::from(code)).map(|m| self.set_operating_mode(m)));
            }
        }

        if let Some(timing) = &remote.timing {
            if let Some(hour) = timing.open_hour {
                report.record(self.set_open_hour(hour));
            }
            if let Some(hour) = timing.close_hour {
                report.record(self.set_close_hour(hour));
            }
            if let Some(secs) = timing.reporting_interval_secs {
                report.record(self.set_reporting_interval_secs(secs));
            }
            if let Some(secs) = timing.connect_budget_secs {
                report.record(self.set_connect_budget_secs(secs));
            }
            if let Some(secs) = timing.cloud_disconnect_budget_secs {
                report.record(self.set_cloud_disconnect_budget_secs(secs));
            }
            if let Some(secs) = timing.modem_off_budget_secs {
                report.record(self.set_modem_off_budget_secs(secs));
            }
        }


        if report.is_clean() {
            info!(" Remote config applied, {} fields", report.applied);
        } else {
            warn!(
                " Remote config applied {} fields, rejected {}",
                report.applied,
                report.rejected.len()
            );
        }
        report
    }
}

/// Merged remote configuration as delivered by the configuration provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub modes: Option<ModeSection>,
    pub timing: Option<TimingSection>,
    pub sensor: Option<SensorSection>,
    pub power: Option<PowerSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSection {
    pub counting_mode: Option<u8>,
    pub operating_mode: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSection {
    pub open_hour: Option<u8>,
    pub close_hour: Option<u8>,
    pub reporting_interval_secs: Option<u32>,
    pub connect_budget_secs: Option<u32>,
    pub cloud_disconnect_budget_secs: Option<u32>,
    pub modem_off_budget_secs: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSection {
    pub sensor_type: Option<u8>,
    pub occupancy_debounce_ms: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSection {
    /// Substitute state-of-charge for tier computation
    pub test_soc_override: Option<u8>,
    /// Remove a previously set override
    pub clear_test_soc_override: Option<bool>,
}

/// Occupancy counting needs a sensor able to hold a presence state.
fn check_occupancy_support(field: &'static str, sensor_type: u8, mode: CountingMode) -> Result<(), ConfigError> {
    let capable = registry::lookup(sensor_type).is_none_or(|info| info.supports_occupancy);
    if mode == CountingMode::Occupancy && !capable {
        return Err(ConfigError::NoOccupancySupport { field, sensor_type });
    }
    Ok(())
}

/// Maximum number of rejected fields remembered per apply.
pub const MAX_REJECTED: usize = 12;

/// Outcome of applying a remote configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: u8,
    pub rejected: Vec<ConfigError, MAX_REJECTED>,
}

impl ApplyReport {
    pub fn record(&mut self, result: Result<(), ConfigError>) {
        match result {
            Ok(()) => self.applied = self.applied.saturating_add(1),
            Err(e) => {
                warn!(" Rejected remote value: {}", e);
                self.rejected.push(e).ok();
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_corrupt_budget_falls_back() {
        let mut config = DeviceConfig::default();
        config.connect_budget_secs = 0;
        config.cloud_disconnect_budget_secs = 10_000;
        config.modem_off_budget_secs = u32::MAX;
        assert_eq!(config.connect_budget_secs(), CONNECT_BUDGET.default);
        assert_eq!(config.cloud_disconnect_budget_secs(), CLOUD_DISCONNECT_BUDGET.default);
        assert_eq!(config.modem_off_budget_secs(), MODEM_OFF_BUDGET.default);
    }

    #[test]
    fn test_setters_reject_out_of_range() {
        let mut config = DeviceConfig::default();
        assert!(config.set_open_hour(24).is_err());
        assert!(config.set_reporting_interval_secs(10).is_err());
        assert!(config.set_connect_budget_secs(5).is_err());
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn test_reset_count_saturates() {
        let mut config = DeviceConfig::default();
        for _ in 0..300 {
            config.increment_reset_count();
        }
        assert_eq!(config.reset_count(), u8::MAX);
    }

    #[test]
    fn test_partial_apply_keeps_valid_fields() {
        let mut config = DeviceConfig::default();
        let remote = RemoteConfig {
            timing: Some(TimingSection {
                open_hour: Some(7),
                close_hour: Some(30),
                reporting_interval_secs: Some(900),
                ..Default::default()
            }),
            modes: Some(ModeSection {
                counting_mode: Some(9),
                operating_mode: Some(1),
            }),
            ..Default::default()
        };

        let report = config.apply_remote(&remote);
        assert_eq!(report.applied, 3);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(config.open_hours(), OpenHours::new(7, 22));
        assert_eq!(config.reporting_interval_secs(), 900);
        assert_eq!(config.operating_mode(), OperatingMode::LowPower);
        assert_eq!(config.counting_mode(), CountingMode::Counting);
    }

    #[test]
    fn test_occupancy_needs_capable_sensor() {
        let mut config = DeviceConfig::default();
        config.set_sensor_type(2).expect("pressure tube");
        assert!(matches!(
            config.set_counting_mode(CountingMode::Occupancy),
            Err(ConfigError::NoOccupancySupport { sensor_type: 2, .. })
        ));
        assert_eq!(config.counting_mode(), CountingMode::Counting);

        // Switching sensor and mode together is accepted
        let remote = RemoteConfig {
            modes: Some(ModeSection {
                counting_mode: Some(1),
                operating_mode: None,
            }),
            sensor: Some(SensorSection {
                sensor_type: Some(1),
                occupancy_debounce_ms: None,
            }),
            ..Default::default()
        };
        assert!(config.apply_remote(&remote).is_clean());
        assert_eq!(config.counting_mode(), CountingMode::Occupancy);

        // Now in occupancy mode, the pressure tube is refused
        assert!(config.set_sensor_type(2).is_err());
        assert_eq!(config.sensor_type(), 1);
    }

    #[test]
    fn test_sanitize_repairs_fields() {
        let mut config = DeviceConfig::default();
        config.open_hour = 40;
        config.sensor_type = 200;
        assert_eq!(config.sanitize(), Some("open_hour"));
        assert_eq!(config.open_hours().open, 6);
        assert_eq!(config.sensor_type(), registry::DEFAULT_SENSOR_CODE);
        assert_eq!(config.sanitize(), None);

        config.sensor_type = 2;
        config.counting_mode = CountingMode::Occupancy;
        assert_eq!(config.sanitize(), Some("counting_mode"));
        assert_eq!(config.counting_mode(), CountingMode::Counting);
    }

    fn arb_remote() -> impl Strategy<Value = RemoteConfig> {
        (
            proptest::option::of((proptest::option::of(0u8..5), proptest::option::of(0u8..5))),
            proptest::option::of((
                proptest::option::of(0u8..30),
                proptest::option::of(0u8..30),
                proptest::option::of(0u32..100_000),
                proptest::option::of(0u32..1_000),
            )),
            proptest::option::of((proptest::option::of(0u8..8), proptest::option::of(0u32..4_000_000))),
        )
            .prop_map(|(modes, timing, sensor)| RemoteConfig {
                modes: modes.map(|(c, o)| ModeSection {
                    counting_mode: c,
                    operating_mode: o,
                }),
                timing: timing.map(|(open, close, interval, budget)| TimingSection {
                    open_hour: open,
                    close_hour: close,
                    reporting_interval_secs: interval,
                    connect_budget_secs: budget,
                    ..Default::default()
                }),
                sensor: sensor.map(|(sensor_type, debounce)| SensorSection {
                    sensor_type,
                    occupancy_debounce_ms: debounce,
                }),
                power: None,
            })
    }

    proptest! {
        #[test]
        fn prop_apply_is_idempotent(remote in arb_remote()) {
            let mut config = DeviceConfig::default();
            config.apply_remote(&remote);
            let once = config.clone();
            config.apply_remote(&remote);
            prop_assert_eq!(config, once);
        }
    }
}
