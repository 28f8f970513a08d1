//! Sensor capability interface and lifecycle management
//!
//! Physical drivers live with the platform. The core only sees the
//! [`Sensor`] capability set, constructs the active sensor through a
//! platform-supplied constructor keyed by the [`registry`] entry, and toggles
//! its power around sleep.

pub mod registry;

use alloc::boxed::Box;
use log::{debug, error, info, warn};

pub use registry::{SensorInfo, lookup, lookup_or_default};

/// Initialization attempts made before giving up for this wake.
pub const SENSOR_INIT_ATTEMPTS: u8 = 2;

/// One reading taken at report time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorSample {
    /// Whether the sensor currently detects presence
    pub presence: bool,
    /// Raw sensor-specific measurement
    pub raw: i32,
    /// Signal quality, 0-100
    pub quality: u8,
}

/// Capability set every physical sensor exposes to the core.
pub trait Sensor {
    /// Bring the sensor up. Returns false when the sensor did not respond.
    fn initialize(&mut self) -> bool;

    /// Check for a detection on polled sensors.
    fn poll(&mut self) -> bool;

    fn read(&mut self) -> SensorSample;

    /// Power the sensor down ahead of sleep.
    fn enter_sleep(&mut self);

    /// Power the sensor back up. Returns false if it needs re-initializing.
    fn exit_sleep(&mut self) -> bool;

    /// Detections are delivered through the sensor interrupt flag.
    fn uses_interrupt(&self) -> bool;

    fn is_ready(&self) -> bool;

    fn is_healthy(&self) -> bool;
}

/// Builds a driver for a registry entry.
pub type SensorConstructor = fn(&'static SensorInfo) -> Box<dyn Sensor>;

/// Owns the active sensor and its power state.
pub struct SensorManager {
    constructor: SensorConstructor,
    info: Option<&'static SensorInfo>,
    sensor: Option<Box<dyn Sensor>>,
    powered: bool,
}

impl SensorManager {
    pub fn new(constructor: SensorConstructor) -> Self {
        Self {
            constructor,
            info: None,
            sensor: None,
            powered: false,
        }
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Make sure a sensor of type `code` exists, is powered and initialized.
    ///
    /// A changed type code replaces the driver. Returns false if the sensor
    /// still is not ready after [`SENSOR_INIT_ATTEMPTS`].
    pub fn ensure_ready(&mut self, code: u8) -> bool {
        let info = lookup_or_default(code);
        if self.info.map(|current| current.code) != Some(info.code) {
            info!(" Creating {} sensor (type {})", info.name, info.code);
            self.sensor = Some((self.constructor)(info));
            self.info = Some(info);
            self.powered = false;
        }

        let Some(sensor) = self.sensor.as_mut() else {
            return false;
        };

        if self.powered && sensor.is_ready() {
            return true;
        }

        for attempt in 1..=SENSOR_INIT_ATTEMPTS {
            if sensor.initialize() && sensor.is_ready() {
                debug!(" {} ready after {} attempt(s)", info.name, attempt);
                self.powered = true;
                return true;
            }
            warn!(" {} initialization attempt {} failed", info.name, attempt);
        }

        error!(" {} failed to initialize", info.name);
        self.powered = false;
        false
    }

    /// Power the sensor down before sleep. No-op if already down.
    pub fn power_down(&mut self) {
        if let Some(sensor) = self.sensor.as_mut() {
            if self.powered {
                sensor.enter_sleep();
                self.powered = false;
                debug!(" Sensor powered down");
            }
        }
    }

    /// Power the sensor back up after a wake, re-initializing it from the
    /// configured type when it did not come back on its own.
    pub fn power_up(&mut self, code: u8) -> bool {
        if let Some(sensor) = self.sensor.as_mut() {
            if !self.powered && sensor.exit_sleep() && sensor.is_ready() {
                self.powered = true;
                debug!(" Sensor powered up");
            }
        }
        self.ensure_ready(code)
    }

    /// Poll sensors that do not raise interrupts.
    pub fn poll(&mut self) -> bool {
        match self.sensor.as_mut() {
            Some(sensor) if self.powered && !sensor.uses_interrupt() => sensor.poll(),
            _ => false,
        }
    }

    pub fn sample(&mut self) -> Option<SensorSample> {
        match self.sensor.as_mut() {
            Some(sensor) if self.powered => Some(sensor.read()),
            _ => None,
        }
    }

    pub fn uses_interrupt(&self) -> bool {
        self.sensor
            .as_ref()
            .map(|s| s.uses_interrupt())
            .or(self.info.map(|i| i.uses_interrupt))
            .unwrap_or(false)
    }

    pub fn is_healthy(&self) -> bool {
        self.sensor.as_ref().is_some_and(|s| s.is_healthy())
    }
}
