//! Scripted platform doubles for driving the full state machine
//!
//! Every fake shares one simulated clock. [`Rig::tick`] runs one state
//! machine tick and then advances the clock by [`TICK_MS`], so budgets and
//! debounce windows expire after a predictable number of ticks.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tally_core::app_state::{AppRunState, AppState, Control};
use tally_core::clock::Clock;
use tally_core::config::RemoteConfig;
use tally_core::error::StorageError;
use tally_core::flags::EventFlag;
use tally_core::persistence::{RECORD_CAPACITY, Record, RecordKey, RecordStore, encode};
use tally_core::platform::{
    ConfigProvider, Connectivity, DeepSleepResult, Devices, EventQueue, PowerMonitor, Publisher, ResetReason,
    SleepControl, WakePins, WakeSources,
};
use tally_core::report::{DataSnapshot, OutboundEvent, StatusSnapshot};
use tally_core::sensors::{Sensor, SensorInfo, SensorSample};
use tally_core::status::{BatteryReading, ChargeState};

/// 2023-11-14 12:00:00 UTC, on an hour boundary.
pub const NOON: u32 = 1_699_963_200;

/// Simulated time consumed by one tick.
pub const TICK_MS: u64 = 1_000;

struct ClockInner {
    now: Cell<u32>,
    uptime_ms: Cell<u64>,
    valid: Cell<bool>,
    offset: Cell<i32>,
}

#[derive(Clone)]
pub struct SimClock(Rc<ClockInner>);

impl SimClock {
    pub fn new(now: u32) -> Self {
        Self(Rc::new(ClockInner {
            now: Cell::new(now),
            uptime_ms: Cell::new(0),
            valid: Cell::new(true),
            offset: Cell::new(0),
        }))
    }

    pub fn set_valid(&self, valid: bool) {
        self.0.valid.set(valid);
    }

    pub fn set_now(&self, now: u32) {
        self.0.now.set(now);
    }

    pub fn advance_ms(&self, ms: u64) {
        let before = self.0.uptime_ms.get();
        let after = before + ms;
        self.0.uptime_ms.set(after);
        let whole_secs = (after / 1_000 - before / 1_000) as u32;
        self.0.now.set(self.0.now.get() + whole_secs);
    }

    pub fn advance_secs(&self, secs: u32) {
        self.advance_ms(u64::from(secs) * 1_000);
    }

    /// Uptime restarts from zero after a reset.
    pub fn reboot(&self) {
        self.0.uptime_ms.set(0);
    }
}

impl Clock for SimClock {
    fn now(&self) -> u32 {
        self.0.now.get()
    }
    fn is_valid(&self) -> bool {
        self.0.valid.get()
    }
    fn utc_offset_secs(&self) -> i32 {
        self.0.offset.get()
    }
    fn uptime_ms(&self) -> u64 {
        self.0.uptime_ms.get()
    }
}

/// Radio that connects a fixed delay after being asked, or never.
pub struct FakeRadio {
    clock: SimClock,
    pub connect_delay_ms: Option<u64>,
    pub connect_requested_ms: Option<u64>,
    pub modem_off: bool,
    /// The modem ignores power-off requests
    pub stuck_modem: bool,
    pub update_pending: bool,
    pub connect_requests: u32,
    pub disconnect_requests: u32,
    pub modem_off_requests: u32,
}

impl FakeRadio {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            connect_delay_ms: Some(5_000),
            connect_requested_ms: None,
            modem_off: true,
            stuck_modem: false,
            update_pending: false,
            connect_requests: 0,
            disconnect_requests: 0,
            modem_off_requests: 0,
        }
    }

    /// Start out connected, as if the link survived from an earlier session.
    pub fn force_connected(&mut self) {
        self.connect_requested_ms = Some(0);
        self.connect_delay_ms = Some(0);
        self.modem_off = false;
    }
}

impl Connectivity for FakeRadio {
    fn request_connect(&mut self) {
        self.connect_requests += 1;
        self.connect_requested_ms = Some(self.clock.uptime_ms());
        self.modem_off = false;
    }
    fn request_disconnect(&mut self) {
        self.disconnect_requests += 1;
        self.connect_requested_ms = None;
    }
    fn request_modem_off(&mut self) {
        self.modem_off_requests += 1;
        self.connect_requested_ms = None;
        if !self.stuck_modem {
            self.modem_off = true;
        }
    }
    fn is_connected(&self) -> bool {
        match (self.connect_requested_ms, self.connect_delay_ms) {
            (Some(at), Some(delay)) => self.clock.uptime_ms() >= at + delay,
            _ => false,
        }
    }
    fn is_disconnected(&self) -> bool {
        !self.is_connected()
    }
    fn is_modem_off(&self) -> bool {
        self.modem_off
    }
    fn signal_quality(&self) -> u8 {
        if self.is_connected() { 72 } else { 0 }
    }
    fn update_pending(&self) -> bool {
        self.update_pending
    }
}

#[derive(Default)]
pub struct FakeConfigProvider {
    pub remote: Option<RemoteConfig>,
    pub loads: u32,
}

impl ConfigProvider for FakeConfigProvider {
    fn load_merged_config(&mut self) -> Option<RemoteConfig> {
        self.loads += 1;
        self.remote.clone()
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub status: Vec<StatusSnapshot>,
    pub data: Vec<DataSnapshot>,
    pub fail_status: bool,
    pub fail_data: bool,
}

impl Publisher for FakePublisher {
    fn publish_status_snapshot(&mut self, snapshot: &StatusSnapshot) -> bool {
        self.status.push(*snapshot);
        !self.fail_status
    }
    fn publish_data_snapshot(&mut self, snapshot: &DataSnapshot) -> bool {
        self.data.push(*snapshot);
        !self.fail_data
    }
}

/// Queue that delivers instantly unless `hold` is set.
#[derive(Default)]
pub struct FakeQueue {
    pub enqueued: Vec<OutboundEvent>,
    pub pending: u32,
    pub hold: bool,
    pub reject: bool,
    pub last_hook: Option<u32>,
}

impl EventQueue for FakeQueue {
    fn enqueue(&mut self, event: OutboundEvent) -> bool {
        if self.reject {
            return false;
        }
        self.enqueued.push(event);
        if self.hold {
            self.pending += 1;
        }
        true
    }
    fn is_safe_to_sleep(&self, _online: bool) -> bool {
        self.pending == 0
    }
    fn pending_count(&self) -> u32 {
        self.pending
    }
    fn last_hook_response(&self) -> Option<u32> {
        self.last_hook
    }
}

pub struct FakePower {
    pub reading: BatteryReading,
}

impl Default for FakePower {
    fn default() -> Self {
        Self {
            reading: BatteryReading {
                soc: 90,
                charge: ChargeState::Discharging,
                temperature_dc: 180,
                fault: None,
            },
        }
    }
}

impl PowerMonitor for FakePower {
    fn read_battery(&mut self) -> BatteryReading {
        self.reading
    }
}

/// One scripted timed-sleep wake: which pins, after how many seconds.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedWake {
    pub pins: WakePins,
    pub after_secs: u32,
}

pub struct FakeSleep {
    clock: SimClock,
    sensor_flag: Rc<EventFlag>,
    pub reset_reason: ResetReason,
    pub override_asserted: bool,
    /// Deep sleep really restarts the device
    pub deep_honored: bool,
    pub deep_calls: Vec<(u32, WakeSources)>,
    pub timed_calls: Vec<(u32, WakeSources)>,
    pub wakes: VecDeque<ScriptedWake>,
    /// A sensor wake also latches the sensor flag
    pub latch_sensor_flag: bool,
    pub soft_resets: u32,
    pub hard_cycles: u32,
}

impl SleepControl for FakeSleep {
    fn deep_sleep(&mut self, seconds: u32, wake: WakeSources) -> DeepSleepResult {
        self.deep_calls.push((seconds, wake));
        if self.deep_honored {
            self.clock.advance_secs(seconds);
            self.reset_reason = ResetReason::DeepSleepWake;
            DeepSleepResult::Restarting
        } else {
            DeepSleepResult::ResumedWithoutReset
        }
    }

    fn timed_sleep(&mut self, seconds: u32, wake: WakeSources) -> WakePins {
        self.timed_calls.push((seconds, wake));
        match self.wakes.pop_front() {
            Some(scripted) => {
                self.clock.advance_secs(scripted.after_secs.min(seconds));
                if scripted.pins.sensor && self.latch_sensor_flag {
                    self.sensor_flag.signal();
                }
                scripted.pins
            }
            None => {
                self.clock.advance_secs(seconds);
                WakePins::default()
            }
        }
    }

    fn soft_reset(&mut self) {
        self.soft_resets += 1;
        self.reset_reason = ResetReason::SoftReset;
    }

    fn hard_power_cycle(&mut self) {
        self.hard_cycles += 1;
        self.reset_reason = ResetReason::PowerManagement;
    }

    fn reset_reason(&self) -> ResetReason {
        self.reset_reason
    }

    fn manual_override_asserted(&self) -> bool {
        self.override_asserted
    }
}

#[derive(Default)]
pub struct MemStore {
    pub records: HashMap<RecordKey, Vec<u8>>,
}

impl RecordStore for MemStore {
    fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.records.get(&key).ok_or(StorageError::Missing(key))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
    fn write(&mut self, key: RecordKey, data: &[u8]) -> Result<(), StorageError> {
        self.records.insert(key, data.to_vec());
        Ok(())
    }
}

/// Write a record into the store as if an earlier boot had saved it.
pub fn seed<T: Record>(store: &mut MemStore, value: &T) {
    let mut buf = [0u8; RECORD_CAPACITY];
    let len = encode(value, &mut buf).expect("record fits");
    store.records.insert(T::KEY, buf[..len].to_vec());
}

thread_local! {
    /// Whether sensors built on this test thread come up.
    static SENSOR_WORKS: Cell<bool> = const { Cell::new(true) };
    static SENSOR_INITS: RefCell<u32> = const { RefCell::new(0) };
}

pub fn set_sensor_works(works: bool) {
    SENSOR_WORKS.with(|w| w.set(works));
}

pub fn sensor_inits() -> u32 {
    SENSOR_INITS.with(|n| *n.borrow())
}

struct TestSensor {
    info: &'static SensorInfo,
    ready: bool,
}

impl Sensor for TestSensor {
    fn initialize(&mut self) -> bool {
        SENSOR_INITS.with(|n| *n.borrow_mut() += 1);
        self.ready = SENSOR_WORKS.with(|w| w.get());
        self.ready
    }
    fn poll(&mut self) -> bool {
        false
    }
    fn read(&mut self) -> SensorSample {
        SensorSample {
            presence: false,
            raw: 3,
            quality: 80,
        }
    }
    fn enter_sleep(&mut self) {
        self.ready = false;
    }
    fn exit_sleep(&mut self) -> bool {
        false
    }
    fn uses_interrupt(&self) -> bool {
        self.info.uses_interrupt
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn is_healthy(&self) -> bool {
        self.ready
    }
}

pub fn test_sensor(info: &'static SensorInfo) -> Box<dyn Sensor> {
    Box::new(TestSensor { info, ready: false })
}

/// All platform doubles plus the interrupt flags.
pub struct Rig {
    pub clock: SimClock,
    pub radio: FakeRadio,
    pub provider: FakeConfigProvider,
    pub publisher: FakePublisher,
    pub queue: FakeQueue,
    pub power: FakePower,
    pub sleep: FakeSleep,
    pub store: MemStore,
    pub sensor_flag: Rc<EventFlag>,
    pub button_flag: EventFlag,
}

impl Rig {
    pub fn new(now: u32) -> Self {
        let clock = SimClock::new(now);
        let sensor_flag = Rc::new(EventFlag::new());
        Self {
            radio: FakeRadio::new(clock.clone()),
            provider: FakeConfigProvider {
                remote: Some(RemoteConfig::default()),
                loads: 0,
            },
            publisher: FakePublisher::default(),
            queue: FakeQueue::default(),
            power: FakePower::default(),
            sleep: FakeSleep {
                clock: clock.clone(),
                sensor_flag: sensor_flag.clone(),
                reset_reason: ResetReason::PowerOn,
                override_asserted: false,
                deep_honored: true,
                deep_calls: Vec::new(),
                timed_calls: Vec::new(),
                wakes: VecDeque::new(),
                latch_sensor_flag: false,
                soft_resets: 0,
                hard_cycles: 0,
            },
            store: MemStore::default(),
            sensor_flag,
            button_flag: EventFlag::new(),
            clock,
        }
    }

    pub fn boot(&mut self) -> AppState {
        self.clock.reboot();
        AppState::boot(&mut self.store, test_sensor)
    }

    pub fn tick(&mut self, app: &mut AppState) -> Control {
        let mut dev = Devices {
            clock: &self.clock,
            radio: &mut self.radio,
            config_provider: &mut self.provider,
            publisher: &mut self.publisher,
            queue: &mut self.queue,
            power: &mut self.power,
            sleep: &mut self.sleep,
            store: &mut self.store,
            sensor_flag: &self.sensor_flag,
            button_flag: &self.button_flag,
        };
        let control = app.tick(&mut dev);
        self.clock.advance_ms(TICK_MS);
        control
    }

    /// Tick until `done` holds after a tick. Returns the number of ticks, or
    /// `None` if `max_ticks` ran out or the device restarted first.
    pub fn run_until(
        &mut self,
        app: &mut AppState,
        max_ticks: usize,
        done: impl Fn(&AppState, &Rig) -> bool,
    ) -> Option<usize> {
        for n in 1..=max_ticks {
            if self.tick(app) == Control::Restart {
                return done(app, self).then_some(n);
            }
            if done(app, self) {
                return Some(n);
            }
        }
        None
    }

    pub fn run_until_state(&mut self, app: &mut AppState, state: AppRunState, max_ticks: usize) -> Option<usize> {
        self.run_until(app, max_ticks, |app, _| app.run_state() == state)
    }
}
