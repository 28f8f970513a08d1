//! Collaborators the control core drives but does not implement
//!
//! Every platform service is reached through a trait object held in
//! [`Devices`], built once per tick from instances the firmware (or the
//! simulator, or a test) owns.

use crate::clock::Clock;
use crate::config::RemoteConfig;
use crate::flags::EventFlag;
use crate::persistence::RecordStore;
use crate::report::{DataSnapshot, OutboundEvent, StatusSnapshot};
use crate::status::BatteryReading;

/// Cloud session and radio control. Every request is non-blocking; progress
/// is observed through the status getters on later ticks.
pub trait Connectivity {
    fn request_connect(&mut self);

    /// Begin tearing down the cloud session.
    fn request_disconnect(&mut self);

    /// Begin powering the radio/modem off.
    fn request_modem_off(&mut self);

    fn is_connected(&self) -> bool;

    /// Cloud session fully torn down.
    fn is_disconnected(&self) -> bool;

    fn is_modem_off(&self) -> bool;

    /// Signal quality, 0-100
    fn signal_quality(&self) -> u8;

    /// A firmware update is queued for this device.
    fn update_pending(&self) -> bool;
}

/// Remote configuration store.
pub trait ConfigProvider {
    /// Fetch the merged configuration. `None` on failure.
    fn load_merged_config(&mut self) -> Option<RemoteConfig>;
}

pub trait Publisher {
    fn publish_status_snapshot(&mut self, snapshot: &StatusSnapshot) -> bool;

    fn publish_data_snapshot(&mut self, snapshot: &DataSnapshot) -> bool;
}

/// Outbound message queue. Delivery is its own business.
pub trait EventQueue {
    fn enqueue(&mut self, event: OutboundEvent) -> bool;

    /// Nothing pending and nothing in flight. `online` lets the queue account
    /// for publishes that can only complete while connected.
    fn is_safe_to_sleep(&self, online: bool) -> bool;

    fn pending_count(&self) -> u32;

    /// Wall-clock time of the last webhook response, if any.
    fn last_hook_response(&self) -> Option<u32>;
}

/// Fuel gauge / power-management chip.
pub trait PowerMonitor {
    fn read_battery(&mut self) -> BatteryReading;
}

/// Why the current boot started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PowerOn,
    DeepSleepWake,
    SoftReset,
    /// Power-management chip cut and restored power
    PowerManagement,
    Other,
}

/// Wake sources armed for a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeSources {
    pub timer: bool,
    pub manual_override: bool,
    pub sensor_interrupt: bool,
}

/// GPIO wake causes latched by the platform. A wake with neither set was the
/// timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakePins {
    pub manual_override: bool,
    pub sensor: bool,
}

/// What came back from a deep sleep request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepSleepResult {
    /// The platform suspended and will restart from boot on wake. On real
    /// hardware the call never returns in this case.
    Restarting,
    /// Execution continued without a reset.
    ResumedWithoutReset,
}

pub trait SleepControl {
    fn deep_sleep(&mut self, seconds: u32, wake: WakeSources) -> DeepSleepResult;

    /// Suspend in place until the timer or an armed pin fires.
    fn timed_sleep(&mut self, seconds: u32, wake: WakeSources) -> WakePins;

    fn soft_reset(&mut self);

    fn hard_power_cycle(&mut self);

    fn reset_reason(&self) -> ResetReason;

    /// Current level of the manual override button.
    fn manual_override_asserted(&self) -> bool;
}

/// Borrowed platform services for one tick.
pub struct Devices<'a> {
    pub clock: &'a dyn Clock,
    pub radio: &'a mut dyn Connectivity,
    pub config_provider: &'a mut dyn ConfigProvider,
    pub publisher: &'a mut dyn Publisher,
    pub queue: &'a mut dyn EventQueue,
    pub power: &'a mut dyn PowerMonitor,
    pub sleep: &'a mut dyn SleepControl,
    pub store: &'a mut dyn RecordStore,
    /// Set by the sensor interrupt handler
    pub sensor_flag: &'a EventFlag,
    /// Set by the manual override button interrupt handler
    pub button_flag: &'a EventFlag,
}

impl Devices<'_> {
    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.clock.uptime_ms()
    }
}
