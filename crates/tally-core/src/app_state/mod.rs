//! Application state machine
//!
//! One [`AppState`] exists per boot. The platform calls [`AppState::tick`]
//! repeatedly; each tick services the counting engine, dispatches exactly one
//! state handler and flushes changed records. Handlers live in the submodules
//! and either move to another state or return to be re-evaluated next tick.

mod connecting;
mod error;
mod firmware_update;
mod idle;
mod initialization;
mod reporting;
mod sleeping;

pub use firmware_update::FIRMWARE_UPDATE_CEILING_MS;

use log::{error, info, warn};

use crate::alerts::{AlertCode, AlertSlot};
use crate::battery::effective_interval;
use crate::clock::LocalTime;
use crate::config::DeviceConfig;
use crate::connectivity::{ConnectSession, DisconnectSession};
use crate::counting::CountingEngine;
use crate::persistence::{LoadOutcome, Persisted, RecordStore};
use crate::platform::Devices;
use crate::sensors::{SensorConstructor, SensorManager};
use crate::sleep::SleepPlanner;
use crate::status::RuntimeStatus;
use crate::supervisor::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Initialization,
    Error,
    Idle,
    Sleeping,
    Connecting,
    Reporting,
    FirmwareUpdate,
}

impl AppRunState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initialization => "INITIALIZATION",
            Self::Error => "ERROR",
            Self::Idle => "IDLE",
            Self::Sleeping => "SLEEPING",
            Self::Connecting => "CONNECTING",
            Self::Reporting => "REPORTING",
            Self::FirmwareUpdate => "FIRMWARE_UPDATE",
        }
    }
}

/// What the platform should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Call `tick` again
    Continue,
    /// The device reset, power cycled or entered a restarting sleep. In-memory
    /// state is gone; boot a fresh [`AppState`] from storage.
    Restart,
}

#[derive(Debug, Clone, Copy, Default)]
struct FirmwareSession {
    entered_ms: u64,
    config_reloaded: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ErrorSession {
    /// Recovery chosen and when, waiting out the settle delay
    decision: Option<(Resolution, u64)>,
}

pub struct AppState {
    run_state: AppRunState,
    /// State dispatched on the previous tick
    previous: Option<AppRunState>,

    config: Persisted<DeviceConfig>,
    status: Persisted<RuntimeStatus>,

    counting: CountingEngine,
    sensors: SensorManager,
    planner: SleepPlanner,

    connect: ConnectSession,
    disconnect: DisconnectSession,
    firmware: FirmwareSession,
    error: ErrorSession,

    /// Post-connect actions ran for the current connect session
    post_connect_done: bool,
    /// Current connect session was opened to deliver a queued report
    connect_for_report: bool,
    connected_once: bool,
    /// Power-management reset: webhook staleness is not evaluated this boot
    suppress_webhook_alert: bool,
    /// Alert slot as loaded at boot
    inherited_alert: AlertSlot,
    /// Uptime before which IDLE does not re-enter ERROR
    error_recheck_ms: u64,
    /// Firmware update abandoned this boot; retried after the next restart
    update_deferred: bool,
}

impl AppState {
    pub fn new(config: DeviceConfig, status: RuntimeStatus, sensor_constructor: SensorConstructor) -> Self {
        Self::from_records(Persisted::new(config), Persisted::new(status), sensor_constructor)
    }

    /// Load both records from storage, installing defaults for any record
    /// that is missing or invalid.
    pub fn boot(store: &mut dyn RecordStore, sensor_constructor: SensorConstructor) -> Self {
        let (config, config_outcome) = Persisted::<DeviceConfig>::load(store);
        let (status, status_outcome) = Persisted::<RuntimeStatus>::load(store);
        if let LoadOutcome::Reset(e) = config_outcome {
            info!(" Boot with default config ({})", e);
        }
        if let LoadOutcome::Reset(e) = status_outcome {
            info!(" Boot with default status ({})", e);
        }
        Self::from_records(config, status, sensor_constructor)
    }

    fn from_records(
        config: Persisted<DeviceConfig>,
        status: Persisted<RuntimeStatus>,
        sensor_constructor: SensorConstructor,
    ) -> Self {
        let inherited_alert = status.alert;
        Self {
            run_state: AppRunState::Initialization,
            previous: None,
            config,
            status,
            counting: CountingEngine::new(),
            sensors: SensorManager::new(sensor_constructor),
            planner: SleepPlanner::new(),
            connect: ConnectSession::new(),
            disconnect: DisconnectSession::new(),
            firmware: FirmwareSession::default(),
            error: ErrorSession::default(),
            post_connect_done: false,
            connect_for_report: false,
            connected_once: false,
            suppress_webhook_alert: false,
            inherited_alert,
            error_recheck_ms: 0,
            update_deferred: false,
        }
    }

    pub fn run_state(&self) -> AppRunState {
        self.run_state
    }

    pub fn previous_state(&self) -> Option<AppRunState> {
        self.previous
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    pub fn status(&self) -> &RuntimeStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut RuntimeStatus {
        &mut self.status
    }

    pub fn sensors(&self) -> &SensorManager {
        &self.sensors
    }

    /// A connection succeeded at least once this boot.
    pub fn connected_once(&self) -> bool {
        self.connected_once
    }

    pub fn is_deep_sleep_available(&self) -> bool {
        self.planner.is_deep_available()
    }

    /// Run one scheduler tick.
    pub fn tick(&mut self, dev: &mut Devices<'_>) -> Control {
        self.service_counting(dev);

        if self.previous != Some(self.run_state) {
            self.enter_state(dev);
        }

        let control = match self.run_state {
            AppRunState::Initialization => self.handle_initialization(dev),
            AppRunState::Error => self.handle_error(dev),
            AppRunState::Idle => self.handle_idle(dev),
            AppRunState::Sleeping => self.handle_sleeping(dev),
            AppRunState::Connecting => self.handle_connecting(dev),
            AppRunState::Reporting => self.handle_reporting(dev),
            AppRunState::FirmwareUpdate => self.handle_firmware_update(dev),
        };

        self.flush(dev.store);
        control
    }

    fn transition(&mut self, next: AppRunState) -> Control {
        self.run_state = next;
        Control::Continue
    }

    /// Entry actions, run once per distinct state change.
    fn enter_state(&mut self, dev: &mut Devices<'_>) {
        let now_ms = dev.uptime_ms();
        match self.previous {
            Some(prev) => info!(" {} -> {}", prev.label(), self.run_state.label()),
            None => info!(" Boot -> {}", self.run_state.label()),
        }

        match self.run_state {
            AppRunState::Connecting => {
                self.connect = ConnectSession::new();
                self.post_connect_done = false;
                self.connect_for_report = self.previous == Some(AppRunState::Reporting);
            }
            AppRunState::FirmwareUpdate => {
                self.connect = ConnectSession::new();
                self.firmware = FirmwareSession {
                    entered_ms: now_ms,
                    config_reloaded: false,
                };
            }
            AppRunState::Sleeping => {
                self.disconnect = DisconnectSession::new();
            }
            AppRunState::Error => {
                self.disconnect = DisconnectSession::new();
                self.error = ErrorSession::default();
            }
            AppRunState::Initialization | AppRunState::Idle | AppRunState::Reporting => {}
        }
        self.previous = Some(self.run_state);
    }

    /// Drain the sensor flag (or poll a polled sensor) and accumulate.
    fn service_counting(&mut self, dev: &mut Devices<'_>) {
        let edge = dev.sensor_flag.take() | self.sensors.poll();
        self.counting.service(
            edge,
            self.config.counting_mode(),
            self.config.occupancy_debounce_ms(),
            &mut self.status,
            dev.now(),
            dev.uptime_ms(),
        );
    }

    /// Write both records if they changed.
    fn flush(&mut self, store: &mut dyn RecordStore) {
        if let Err(e) = self.config.flush(store) {
            error!(" Config flush failed: {}", e);
        }
        if let Err(e) = self.status.flush(store) {
            error!(" Status flush failed: {}", e);
        }
    }

    /// Inside open hours. An unsynchronised clock always counts as open.
    fn is_open(&self, dev: &Devices<'_>) -> bool {
        !dev.clock.is_valid() || self.config.open_hours().is_open(&LocalTime::from_clock(dev.clock))
    }

    fn effective_interval(&self) -> u32 {
        effective_interval(self.config.reporting_interval_secs(), self.status.battery_tier)
    }

    /// A firmware update is pending and has not been given up on this boot.
    fn update_waiting(&self) -> bool {
        self.status.update_pending && !self.update_deferred
    }

    /// The active alert was raised during this boot. An alert carried over a
    /// reset only counts once the failing operation has been retried and
    /// failed again.
    fn alert_raised_this_boot(&self) -> bool {
        self.status.alert != self.inherited_alert
    }

    fn report_due(&self, now: u32) -> bool {
        now.saturating_sub(self.config.last_report()) >= self.effective_interval()
    }

    /// Bring the configured sensor up, raising the sensor alert on failure.
    fn ensure_sensor(&mut self, now: u32) -> bool {
        if self.sensors.power_up(self.config.sensor_type()) {
            return true;
        }
        warn!(" Sensor type {} unavailable", self.config.sensor_type());
        self.status.raise_alert(AlertCode::SensorFault, now);
        false
    }
}
