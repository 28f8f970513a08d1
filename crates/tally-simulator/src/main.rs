//! Desktop simulator for the tally control core.
//!
//! Runs tally-core against simulated devices on a simulated clock for a
//! number of days and logs what the state machine did. Deep sleep reboots
//! the core from the in-memory record store, the way the device restarts.
//!
//! # Usage
//!
//! ```text
//! tally-simulator [DAYS] [connected|low-power|disconnected]
//! ```
//!
//! Set `RUST_LOG=debug` for per-tick detail.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use log::{info, warn};

use tally_core::alerts::AlertCode;
use tally_core::app_state::{AppState, Control};
use tally_core::clock::{Clock, LocalTime};
use tally_core::config::{ModeSection, RemoteConfig, TimingSection};
use tally_core::error::StorageError;
use tally_core::flags::EventFlag;
use tally_core::persistence::{RecordKey, RecordStore};
use tally_core::platform::{
    ConfigProvider, Connectivity, DeepSleepResult, Devices, EventQueue, PowerMonitor, Publisher, ResetReason,
    SleepControl, WakePins, WakeSources,
};
use tally_core::report::{DataSnapshot, OutboundEvent, StatusSnapshot};
use tally_core::sensors::{Sensor, SensorInfo, SensorSample};
use tally_core::status::{BatteryReading, ChargeState};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// 2024-06-03 00:00:00 UTC
const SIM_START: u32 = 1_717_372_800;

const DEFAULT_DAYS: u32 = 3;

/// Simulated time consumed by one awake tick.
const TICK_MS: u64 = 1_000;

/// Time from connect request to an established cloud session.
const CONNECT_DELAY_MS: u64 = 8_000;

/// Every Nth connect attempt never succeeds.
const FAILED_CONNECT_EVERY: u32 = 9;

/// Local hours with foot traffic, and the spacing of detections.
const TRAFFIC_HOURS: core::ops::Range<u8> = 7..20;
const DETECTION_PERIOD_SECS: u32 = 97;

/// Solar charging window, local hours.
const CHARGE_HOURS: core::ops::Range<u8> = 10..15;

// ---------------------------------------------------------------------------
// Simulated clock
// ---------------------------------------------------------------------------

struct ClockState {
    now: Cell<u32>,
    uptime_ms: Cell<u64>,
}

/// Wall clock plus uptime, shared by every simulated device.
#[derive(Clone)]
struct SimClock(Rc<ClockState>);

impl SimClock {
    fn new(start: u32) -> Self {
        Self(Rc::new(ClockState {
            now: Cell::new(start),
            uptime_ms: Cell::new(0),
        }))
    }

    fn advance_ms(&self, ms: u64) {
        let before = self.0.uptime_ms.get();
        let after = before + ms;
        self.0.uptime_ms.set(after);
        self.0.now.set(self.0.now.get() + (after / 1_000 - before / 1_000) as u32);
    }

    fn advance_secs(&self, secs: u32) {
        self.advance_ms(u64::from(secs) * 1_000);
    }

    fn reboot(&self) {
        self.0.uptime_ms.set(0);
    }
}

impl Clock for SimClock {
    fn now(&self) -> u32 {
        self.0.now.get()
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn utc_offset_secs(&self) -> i32 {
        0
    }
    fn uptime_ms(&self) -> u64 {
        self.0.uptime_ms.get()
    }
}

/// Whether the simulated crowd trips the sensor at `t`.
fn detection_at(t: u32) -> bool {
    TRAFFIC_HOURS.contains(&LocalTime::from_unix(t, 0).hour) && t % DETECTION_PERIOD_SECS == 0
}

// ---------------------------------------------------------------------------
// Simulated devices
// ---------------------------------------------------------------------------

struct SimRadio {
    clock: SimClock,
    requested_ms: Option<u64>,
    fails_this_attempt: bool,
    modem_off: bool,
    attempts: u32,
    connections: u32,
    was_connected: Cell<bool>,
}

impl SimRadio {
    fn new(clock: SimClock) -> Self {
        Self {
            clock,
            requested_ms: None,
            fails_this_attempt: false,
            modem_off: true,
            attempts: 0,
            connections: 0,
            was_connected: Cell::new(false),
        }
    }

    /// Count established sessions once per session.
    fn observe(&mut self) {
        let up = self.is_connected();
        if up && !self.was_connected.get() {
            self.connections += 1;
        }
        self.was_connected.set(up);
    }

    /// A reboot powers the modem down.
    fn power_loss(&mut self) {
        self.requested_ms = None;
        self.modem_off = true;
        self.was_connected.set(false);
    }
}

impl Connectivity for SimRadio {
    fn request_connect(&mut self) {
        self.attempts += 1;
        self.fails_this_attempt = self.attempts % FAILED_CONNECT_EVERY == 0;
        if self.fails_this_attempt {
            warn!("[sim] connect attempt {} will not succeed", self.attempts);
        }
        self.requested_ms = Some(self.clock.uptime_ms());
        self.modem_off = false;
    }
    fn request_disconnect(&mut self) {
        self.requested_ms = None;
    }
    fn request_modem_off(&mut self) {
        self.requested_ms = None;
        self.modem_off = true;
    }
    fn is_connected(&self) -> bool {
        !self.fails_this_attempt
            && self
                .requested_ms
                .is_some_and(|at| self.clock.uptime_ms() >= at + CONNECT_DELAY_MS)
    }
    fn is_disconnected(&self) -> bool {
        !self.is_connected()
    }
    fn is_modem_off(&self) -> bool {
        self.modem_off
    }
    fn signal_quality(&self) -> u8 {
        if self.is_connected() { 64 } else { 0 }
    }
    fn update_pending(&self) -> bool {
        false
    }
}

struct SimConfigProvider {
    remote: RemoteConfig,
}

impl ConfigProvider for SimConfigProvider {
    fn load_merged_config(&mut self) -> Option<RemoteConfig> {
        Some(self.remote.clone())
    }
}

#[derive(Default)]
struct SimPublisher {
    status: u32,
    data: u32,
}

impl Publisher for SimPublisher {
    fn publish_status_snapshot(&mut self, snapshot: &StatusSnapshot) -> bool {
        self.status += 1;
        info!(
            "[sim] status: tier {:?}, battery {}%, alert {}, {} resets",
            snapshot.battery_tier, snapshot.battery_soc, snapshot.alert_code, snapshot.reset_count
        );
        true
    }
    fn publish_data_snapshot(&mut self, _snapshot: &DataSnapshot) -> bool {
        self.data += 1;
        true
    }
}

/// Holds reports until the radio is up.
#[derive(Default)]
struct SimQueue {
    pending: Vec<OutboundEvent>,
    delivered: u32,
    last_hook: Option<u32>,
}

impl SimQueue {
    fn deliver(&mut self, now: u32) {
        if self.pending.is_empty() {
            return;
        }
        self.delivered += self.pending.len() as u32;
        self.pending.clear();
        self.last_hook = Some(now);
    }
}

impl EventQueue for SimQueue {
    fn enqueue(&mut self, event: OutboundEvent) -> bool {
        self.pending.push(event);
        true
    }
    fn is_safe_to_sleep(&self, online: bool) -> bool {
        !online || self.pending.is_empty()
    }
    fn pending_count(&self) -> u32 {
        self.pending.len() as u32
    }
    fn last_hook_response(&self) -> Option<u32> {
        self.last_hook
    }
}

/// Fuel gauge with a slow drain and a midday solar charge.
struct SimPower {
    clock: SimClock,
    soc: f32,
    last_read: u32,
}

impl PowerMonitor for SimPower {
    fn read_battery(&mut self) -> BatteryReading {
        let now = self.clock.now();
        let hours = now.saturating_sub(self.last_read) as f32 / 3_600.0;
        self.last_read = now;

        let charging = CHARGE_HOURS.contains(&LocalTime::from_unix(now, 0).hour);
        let rate = if charging { 4.0 } else { -1.2 };
        self.soc = (self.soc + rate * hours).clamp(0.0, 100.0);

        BatteryReading {
            soc: self.soc as u8,
            charge: match (charging, self.soc >= 100.0) {
                (_, true) => ChargeState::Full,
                (true, false) => ChargeState::Charging,
                (false, false) => ChargeState::Discharging,
            },
            temperature_dc: if charging { 310 } else { 190 },
            fault: None,
        }
    }
}

#[derive(Default)]
struct SleepStats {
    deep: u32,
    timed: u32,
    sensor_wakes: u32,
    soft_resets: u32,
    hard_cycles: u32,
}

struct SimSleep {
    clock: SimClock,
    reset_reason: ResetReason,
    stats: SleepStats,
}

impl SleepControl for SimSleep {
    fn deep_sleep(&mut self, seconds: u32, _wake: WakeSources) -> DeepSleepResult {
        self.stats.deep += 1;
        self.clock.advance_secs(seconds);
        self.reset_reason = ResetReason::DeepSleepWake;
        DeepSleepResult::Restarting
    }

    fn timed_sleep(&mut self, seconds: u32, wake: WakeSources) -> WakePins {
        self.stats.timed += 1;
        let start = self.clock.now();
        if wake.sensor_interrupt {
            if let Some(t) = (start + 1..=start + seconds).find(|&t| detection_at(t)) {
                self.clock.advance_secs(t - start);
                self.stats.sensor_wakes += 1;
                return WakePins {
                    manual_override: false,
                    sensor: true,
                };
            }
        }
        self.clock.advance_secs(seconds);
        WakePins::default()
    }

    fn soft_reset(&mut self) {
        self.stats.soft_resets += 1;
        self.reset_reason = ResetReason::SoftReset;
    }

    fn hard_power_cycle(&mut self) {
        self.stats.hard_cycles += 1;
        self.reset_reason = ResetReason::PowerManagement;
    }

    fn reset_reason(&self) -> ResetReason {
        self.reset_reason
    }

    fn manual_override_asserted(&self) -> bool {
        false
    }
}

/// Stands in for the EEPROM.
#[derive(Default)]
struct SimStore {
    records: HashMap<RecordKey, Vec<u8>>,
}

impl RecordStore for SimStore {
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

/// PIR stand-in. Detections arrive through the sensor flag.
struct SimPir {
    ready: bool,
}

impl Sensor for SimPir {
    fn initialize(&mut self) -> bool {
        self.ready = true;
        true
    }
    fn poll(&mut self) -> bool {
        false
    }
    fn read(&mut self) -> SensorSample {
        SensorSample {
            presence: false,
            raw: 0,
            quality: 100,
        }
    }
    fn enter_sleep(&mut self) {
        self.ready = false;
    }
    fn exit_sleep(&mut self) -> bool {
        self.ready = true;
        true
    }
    fn uses_interrupt(&self) -> bool {
        true
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn is_healthy(&self) -> bool {
        self.ready
    }
}

fn sim_sensor(info: &'static SensorInfo) -> Box<dyn Sensor> {
    info!("[sim] building {} driver", info.name);
    Box::new(SimPir { ready: false })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn parse_args() -> (u32, u8) {
    let mut args = std::env::args().skip(1);
    let days = args.next().and_then(|d| d.parse().ok()).unwrap_or(DEFAULT_DAYS);
    let mode = match args.next().as_deref() {
        Some("connected") => 0,
        Some("disconnected") => 2,
        _ => 1,
    };
    (days, mode)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (days, mode) = parse_args();
    info!("Starting tally simulator: {} days, operating mode {}", days, mode);

    let clock = SimClock::new(SIM_START);
    let mut radio = SimRadio::new(clock.clone());
    let mut provider = SimConfigProvider {
        remote: RemoteConfig {
            modes: Some(ModeSection {
                counting_mode: Some(0),
                operating_mode: Some(mode),
            }),
            timing: Some(TimingSection {
                open_hour: Some(6),
                close_hour: Some(22),
                reporting_interval_secs: Some(3_600),
                connect_budget_secs: Some(120),
                ..Default::default()
            }),
            ..Default::default()
        },
    };
    let mut publisher = SimPublisher::default();
    let mut queue = SimQueue::default();
    let mut power = SimPower {
        clock: clock.clone(),
        soc: 80.0,
        last_read: SIM_START,
    };
    let mut sleep = SimSleep {
        clock: clock.clone(),
        reset_reason: ResetReason::PowerOn,
        stats: SleepStats::default(),
    };
    let mut store = SimStore::default();
    let sensor_flag = EventFlag::new();
    let button_flag = EventFlag::new();

    let end = SIM_START + days * 86_400;
    let mut app = AppState::boot(&mut store, sim_sensor);
    let mut boots = 1u32;
    let mut last_alert = 0i8;
    let mut alerts: BTreeMap<i8, u32> = BTreeMap::new();

    while clock.now() < end {
        if detection_at(clock.now()) {
            sensor_flag.signal();
        }

        // Deliver before the tick so post-connect sees the fresh hook response
        if radio.is_connected() {
            queue.deliver(clock.now());
        }

        let control = {
            let mut dev = Devices {
                clock: &clock,
                radio: &mut radio,
                config_provider: &mut provider,
                publisher: &mut publisher,
                queue: &mut queue,
                power: &mut power,
                sleep: &mut sleep,
                store: &mut store,
                sensor_flag: &sensor_flag,
                button_flag: &button_flag,
            };
            app.tick(&mut dev)
        };

        radio.observe();

        let alert = app.status().alert.raw_code();
        if alert != last_alert {
            if let Some(code) = AlertCode::from_code(alert) {
                info!("[sim] alert {} ({})", alert, code.label());
                *alerts.entry(alert).or_default() += 1;
            }
            last_alert = alert;
        }

        match control {
            Control::Continue => clock.advance_ms(TICK_MS),
            Control::Restart => {
                boots += 1;
                clock.reboot();
                radio.power_loss();
                app = AppState::boot(&mut store, sim_sensor);
            }
        }
    }

    let status = app.status();
    info!("Simulation finished after {} days", days);
    info!(
        "Boots {}, connect attempts {}, sessions {}, reports delivered {}, still queued {}",
        boots,
        radio.attempts,
        radio.connections,
        queue.delivered,
        queue.pending.len()
    );
    info!(
        "Sleeps: {} deep, {} timed ({} sensor wakes); resets: {} soft, {} hard",
        sleep.stats.deep,
        sleep.stats.timed,
        sleep.stats.sensor_wakes,
        sleep.stats.soft_resets,
        sleep.stats.hard_cycles
    );
    info!(
        "Published {} status and {} data snapshots",
        publisher.status, publisher.data
    );
    info!(
        "Final: daily count {}, battery {}% ({}), reset count {}",
        status.daily_count,
        status.battery_soc,
        status.battery_tier.label(),
        app.config().reset_count()
    );
    for (code, raised) in &alerts {
        info!("Alert {} raised {} time(s)", code, raised);
    }
}
