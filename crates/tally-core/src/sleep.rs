//! Sleep strategy selection
//!
//! Two strategies exist. Deep sleep restarts the process on wake and is only
//! used while closed. Timed sleep resumes in place and is the fallback, and
//! the only strategy used while open. The planner only decides; the sleeping
//! state executes the plan against [`SleepControl`](crate::platform::SleepControl).

use log::{debug, warn};

use crate::clock::{LocalTime, OpenHours, SECS_PER_DAY};
use crate::platform::{WakePins, WakeSources};

/// Forward margin added past an interval boundary so the wake lands after it.
pub const SLEEP_MARGIN_SECS: u32 = 5;

/// Timed sleeps shorter than this are stretched by one interval.
pub const MIN_TIMED_SLEEP_SECS: u32 = 10;

/// Longest suspension the platform accepts.
pub const MAX_SLEEP_SECS: u32 = 7 * SECS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Deep,
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub strategy: Strategy,
    pub seconds: u32,
    pub wake: WakeSources,
}

/// Why a timed sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    ManualOverride,
    Sensor,
    Timer,
}

impl WakeCause {
    /// Classify by exclusion: no latched pin means the timer fired.
    pub fn classify(pins: WakePins) -> Self {
        if pins.manual_override {
            Self::ManualOverride
        } else if pins.sensor {
            Self::Sensor
        } else {
            Self::Timer
        }
    }
}

/// Everything the planner needs to size a sleep.
#[derive(Debug, Clone, Copy)]
pub struct SleepInputs {
    pub now: u32,
    pub time_valid: bool,
    /// Effective reporting interval
    pub interval_secs: u32,
    pub open_hours: OpenHours,
    pub local: LocalTime,
    /// Time left on an open occupancy session
    pub debounce_remaining_ms: Option<u64>,
    /// The active sensor reports through an interrupt that can wake us
    pub sensor_interrupt: bool,
}

impl SleepInputs {
    /// An unsynchronised clock cannot place the device outside open hours.
    pub fn is_open(&self) -> bool {
        !self.time_valid || self.open_hours.is_open(&self.local)
    }
}

/// Seconds until just past the next multiple of `interval` from wall-clock
/// zero, or simply `interval` when the clock cannot be trusted.
pub fn interval_sleep_secs(now: u32, interval: u32, time_valid: bool) -> u32 {
    let interval = interval.max(1);
    if !time_valid {
        return interval;
    }
    let mut secs = interval - now % interval + SLEEP_MARGIN_SECS;
    if secs < MIN_TIMED_SLEEP_SECS {
        secs = secs.saturating_add(interval);
    }
    secs
}

/// Per-boot sleep strategy bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct SleepPlanner {
    /// Deep sleep came back without a reset this boot
    deep_unreliable: bool,
    /// Deep sleep already tried since the window last closed
    deep_attempted: bool,
}

impl SleepPlanner {
    pub const fn new() -> Self {
        Self {
            deep_unreliable: false,
            deep_attempted: false,
        }
    }

    pub fn is_deep_available(&self) -> bool {
        !self.deep_unreliable
    }

    /// Called whenever the device is seen inside open hours, re-arming the
    /// once-per-closed-window deep sleep attempt.
    pub fn observe_open(&mut self) {
        self.deep_attempted = false;
    }

    /// Deep sleep did not reset the device. Never try it again this boot.
    pub fn mark_deep_unreliable(&mut self) {
        warn!(" Deep sleep resumed without reset, disabled until next boot");
        self.deep_unreliable = true;
    }

    /// Choose the strategy for this sleep.
    pub fn plan(&mut self, inputs: &SleepInputs) -> SleepPlan {
        if inputs.is_open() {
            self.observe_open();
        } else if !self.deep_unreliable && !self.deep_attempted {
            self.deep_attempted = true;
            return Self::deep_plan(inputs);
        }
        Self::timed_plan(inputs)
    }

    /// Sleep until opening time. Apart from the timer that ends the sleep at
    /// opening, the manual override is the only wake source; the sensor is
    /// never armed.
    pub fn deep_plan(inputs: &SleepInputs) -> SleepPlan {
        let seconds = inputs
            .open_hours
            .seconds_until_open(&inputs.local)
            .clamp(1, MAX_SLEEP_SECS);
        debug!(" Deep sleep planned for {}s", seconds);
        SleepPlan {
            strategy: Strategy::Deep,
            seconds,
            wake: WakeSources {
                timer: true,
                manual_override: true,
                sensor_interrupt: false,
            },
        }
    }

    /// Sleep to the next interval boundary, bounded by opening time while
    /// closed and by the occupancy debounce while occupied.
    pub fn timed_plan(inputs: &SleepInputs) -> SleepPlan {
        let open = inputs.is_open();
        let mut seconds = interval_sleep_secs(inputs.now, inputs.interval_secs, inputs.time_valid);

        if !open {
            let until_open = inputs.open_hours.seconds_until_open(&inputs.local);
            if until_open > 0 {
                seconds = seconds.min(until_open);
            }
        }
        if let Some(remaining_ms) = inputs.debounce_remaining_ms {
            let remaining = remaining_ms.div_ceil(1000).min(u64::from(u32::MAX)) as u32;
            seconds = seconds.min(remaining.max(1));
        }
        let seconds = seconds.clamp(1, MAX_SLEEP_SECS);
        let sensor_wake = open && inputs.sensor_interrupt;
        debug!(" Timed sleep planned for {}s, sensor wake {}", seconds, sensor_wake);

        SleepPlan {
            strategy: Strategy::Timed,
            seconds,
            wake: WakeSources {
                timer: true,
                manual_override: true,
                sensor_interrupt: sensor_wake,
            },
        }
    }
}
