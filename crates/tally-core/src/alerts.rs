//! Alert codes and the single-slot alert register
//!
//! The device surfaces at most one alert at a time. Codes form a closed
//! enumeration that the remote operator sees in status snapshots and that the
//! error supervisor consumes. Severity is a fixed ranking, unrelated to the
//! numeric value of the code.

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Externally observable alert codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum AlertCode {
    /// Sensor failed to initialize or reports unhealthy
    SensorFault = 12,
    /// Heap exhausted
    OutOfMemory = 14,
    /// Cloud teardown or modem power-off did not finish within budget
    ModemFault = 15,
    /// Deep sleep returned without resetting the device
    SleepFault = 16,
    /// Power-management chip: battery fault reported
    PmicBatteryFault = 20,
    /// Power-management chip: charge fault reported
    PmicChargeFault = 21,
    /// Power-management chip: thermal shutdown reported
    PmicThermalFault = 23,
    /// Connection attempt exceeded its budget
    ConnectTimeout = 31,
    /// Webhook has not answered for too long
    WebhookStale = 40,
    /// Part of a remote configuration was rejected
    ConfigApplyFailed = 41,
    /// Data snapshot could not be published
    DataPublishFailed = 42,
    /// Status snapshot could not be published
    StatusPublishFailed = 43,
    /// Device has been offline longer than its schedule allows
    ProlongedOffline = 44,
}

impl AlertCode {
    /// Every known code, lowest severity first.
    pub const BY_SEVERITY: [AlertCode; 13] = [
        AlertCode::WebhookStale,
        AlertCode::DataPublishFailed,
        AlertCode::StatusPublishFailed,
        AlertCode::ConfigApplyFailed,
        AlertCode::SensorFault,
        AlertCode::ProlongedOffline,
        AlertCode::ConnectTimeout,
        AlertCode::ModemFault,
        AlertCode::SleepFault,
        AlertCode::PmicBatteryFault,
        AlertCode::PmicChargeFault,
        AlertCode::PmicThermalFault,
        AlertCode::OutOfMemory,
    ];

    /// Numeric code as reported to the cloud.
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Map a raw code back to the enumeration. Zero and unknown codes yield `None`.
    pub fn from_code(code: i8) -> Option<Self> {
        Self::BY_SEVERITY.iter().copied().find(|a| a.code() == code)
    }

    /// Severity rank, higher is more serious.
    pub const fn severity(self) -> u8 {
        match self {
            Self::WebhookStale => 1,
            Self::DataPublishFailed => 2,
            Self::StatusPublishFailed => 3,
            Self::ConfigApplyFailed => 4,
            Self::SensorFault => 5,
            Self::ProlongedOffline => 6,
            Self::ConnectTimeout => 7,
            Self::ModemFault => 8,
            Self::SleepFault => 9,
            Self::PmicBatteryFault => 10,
            Self::PmicChargeFault => 11,
            Self::PmicThermalFault => 12,
            Self::OutOfMemory => 13,
        }
    }

    /// Alerts that describe lost connectivity rather than a local fault.
    pub const fn is_connectivity(self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::ProlongedOffline)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::SensorFault => "sensor fault",
            Self::OutOfMemory => "out of memory",
            Self::ModemFault => "modem teardown failure",
            Self::SleepFault => "sleep strategy failure",
            Self::PmicBatteryFault => "pmic battery fault",
            Self::PmicChargeFault => "pmic charge fault",
            Self::PmicThermalFault => "pmic thermal fault",
            Self::ConnectTimeout => "connect timeout",
            Self::WebhookStale => "webhook stale",
            Self::ConfigApplyFailed => "config apply failure",
            Self::DataPublishFailed => "data publish failure",
            Self::StatusPublishFailed => "status publish failure",
            Self::ProlongedOffline => "prolonged offline",
        }
    }
}

/// Single active alert with the time it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertSlot {
    /// Raw code, 0 when no alert is active
    code: i8,
    timestamp: u32,
}

impl AlertSlot {
    pub const fn new() -> Self {
        Self {
            code: 0,
            timestamp: 0,
        }
    }

    pub fn current(&self) -> Option<AlertCode> {
        AlertCode::from_code(self.code)
    }

    pub const fn raw_code(&self) -> i8 {
        self.code
    }

    pub const fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Raise `alert`. It replaces the active alert only when it is at least
    /// as severe. Returns true when the slot now holds `alert`.
    pub fn raise(&mut self, alert: AlertCode, now: u32) -> bool {
        match self.current() {
            Some(existing) if existing.severity() > alert.severity() => {
                debug!(
                    " Alert {} ({}) not raised, {} ({}) is more severe",
                    alert.code(),
                    alert.label(),
                    existing.code(),
                    existing.label()
                );
                false
            }
            existing => {
                info!(
                    " Alert {} ({}) raised, severity {}, replaces {:?}",
                    alert.code(),
                    alert.label(),
                    alert.severity(),
                    existing.map(AlertCode::code)
                );
                self.code = alert.code();
                self.timestamp = now;
                true
            }
        }
    }

    /// Clear whatever alert is active.
    pub fn clear(&mut self) {
        if self.code != 0 {
            info!(" Alert {} cleared", self.code);
        }
        self.code = 0;
        self.timestamp = 0;
    }

    /// Clear the active alert only if it matches `predicate`.
    pub fn clear_if(&mut self, predicate: impl Fn(AlertCode) -> bool) -> bool {
        match self.current() {
            Some(alert) if predicate(alert) => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Drop codes that are not part of the enumeration, e.g. after loading an
    /// older record.
    pub fn sanitize(&mut self) {
        if self.code != 0 && self.current().is_none() {
            self.clear();
        }
    }
}
