//! Phased, non-blocking cloud connection and teardown
//!
//! Each session advances at most one step per tick and never waits. The
//! state machine owns one session per phased operation and resets it when
//! the owning state is entered.

use log::{info, warn};

use crate::alerts::AlertCode;
use crate::config::{ApplyReport, DeviceConfig};
use crate::platform::{ConfigProvider, Connectivity, Devices};
use crate::report::{DataSnapshot, StatusSnapshot};
use crate::status::RuntimeStatus;
use crate::supervisor::{WEBHOOK_STALE_SECS, is_systemic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    Pending,
    /// Connection observed for the first time this session
    JustConnected { elapsed_secs: u32 },
    Connected,
    TimedOut { elapsed_secs: u32 },
}

/// Connect request plus budget tracking.
#[derive(Debug, Clone, Default)]
pub struct ConnectSession {
    requested_at_ms: Option<u64>,
    connected: bool,
    timed_out: bool,
}

impl ConnectSession {
    pub const fn new() -> Self {
        Self {
            requested_at_ms: None,
            connected: false,
            timed_out: false,
        }
    }

    pub fn step(&mut self, radio: &mut dyn Connectivity, budget_secs: u32, now_ms: u64) -> ConnectProgress {
        let elapsed_secs = self
            .requested_at_ms
            .map(|at| (now_ms.saturating_sub(at) / 1000) as u32)
            .unwrap_or(0);

        if self.timed_out {
            return ConnectProgress::TimedOut { elapsed_secs };
        }

        if radio.is_connected() {
            if self.connected {
                return ConnectProgress::Connected;
            }
            self.connected = true;
            return ConnectProgress::JustConnected { elapsed_secs };
        }
        self.connected = false;

        match self.requested_at_ms {
            None => {
                info!(" Requesting connection, budget {}s", budget_secs);
                radio.request_connect();
                self.requested_at_ms = Some(now_ms);
                ConnectProgress::Pending
            }
            Some(_) if elapsed_secs > budget_secs => {
                warn!(" Connection not up after {}s (budget {}s)", elapsed_secs, budget_secs);
                self.timed_out = true;
                ConnectProgress::TimedOut { elapsed_secs }
            }
            Some(_) => ConnectProgress::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectPhase {
    NotStarted,
    CloudTeardown { since_ms: u64 },
    ModemOff,
    Done,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectProgress {
    Pending,
    Done,
    TimedOut { elapsed_secs: u32 },
}

/// Cloud teardown followed by modem power-off, each with its own budget and
/// a combined ceiling.
#[derive(Debug, Clone)]
pub struct DisconnectSession {
    phase: DisconnectPhase,
    started_ms: u64,
}

impl Default for DisconnectSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DisconnectSession {
    pub const fn new() -> Self {
        Self {
            phase: DisconnectPhase::NotStarted,
            started_ms: 0,
        }
    }

    pub fn step(
        &mut self,
        radio: &mut dyn Connectivity,
        cloud_budget_secs: u32,
        modem_budget_secs: u32,
        now_ms: u64,
    ) -> DisconnectProgress {
        let total_secs = (now_ms.saturating_sub(self.started_ms) / 1000) as u32;

        match self.phase {
            DisconnectPhase::NotStarted => {
                self.started_ms = now_ms;
                if !radio.is_connected() && radio.is_modem_off() {
                    self.phase = DisconnectPhase::Done;
                    return DisconnectProgress::Done;
                }
                if radio.is_connected() || !radio.is_disconnected() {
                    info!(" Disconnecting from cloud");
                    radio.request_disconnect();
                    self.phase = DisconnectPhase::CloudTeardown { since_ms: now_ms };
                } else {
                    info!(" Powering modem off");
                    radio.request_modem_off();
                    self.phase = DisconnectPhase::ModemOff;
                }
                DisconnectProgress::Pending
            }
            DisconnectPhase::CloudTeardown { since_ms } => {
                let phase_secs = (now_ms.saturating_sub(since_ms) / 1000) as u32;
                if radio.is_disconnected() {
                    info!(" Cloud disconnected after {}s, powering modem off", phase_secs);
                } else if phase_secs > cloud_budget_secs {
                    warn!(
                        " Cloud teardown exceeded {}s budget, forcing modem off",
                        cloud_budget_secs
                    );
                } else {
                    return DisconnectProgress::Pending;
                }
                radio.request_modem_off();
                self.phase = DisconnectPhase::ModemOff;
                DisconnectProgress::Pending
            }
            DisconnectPhase::ModemOff => {
                if radio.is_modem_off() {
                    info!(" Modem off after {}s", total_secs);
                    self.phase = DisconnectPhase::Done;
                    DisconnectProgress::Done
                } else if total_secs > cloud_budget_secs.saturating_add(modem_budget_secs) {
                    warn!(
                        " Disconnect not finished after {}s (budget {}s + {}s)",
                        total_secs, cloud_budget_secs, modem_budget_secs
                    );
                    self.phase = DisconnectPhase::TimedOut;
                    DisconnectProgress::TimedOut {
                        elapsed_secs: total_secs,
                    }
                } else {
                    DisconnectProgress::Pending
                }
            }
            DisconnectPhase::Done => DisconnectProgress::Done,
            DisconnectPhase::TimedOut => DisconnectProgress::TimedOut {
                elapsed_secs: total_secs,
            },
        }
    }
}

/// Radio off immediately, no teardown sequencing. Used after a failed connect.
pub fn force_radio_off(radio: &mut dyn Connectivity) {
    if radio.is_connected() || !radio.is_disconnected() {
        radio.request_disconnect();
    }
    if !radio.is_modem_off() {
        radio.request_modem_off();
    }
}

/// Fetch and apply the merged remote configuration. Raises the
/// configuration alert on a failed fetch or any rejected field.
pub fn reload_remote_config(
    provider: &mut dyn ConfigProvider,
    config: &mut DeviceConfig,
    status: &mut RuntimeStatus,
    now: u32,
) -> Option<ApplyReport> {
    let Some(remote) = provider.load_merged_config() else {
        warn!(" Remote config reload failed");
        status.raise_alert(AlertCode::ConfigApplyFailed, now);
        return None;
    };
    let mut report = config.apply_remote(&remote);
    if let Some(power) = &remote.power {
        status.apply_remote_power(power, &mut report);
    }
    if !report.is_clean() {
        status.raise_alert(AlertCode::ConfigApplyFailed, now);
    }
    Some(report)
}

/// What the post-connect actions did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostConnectSummary {
    pub config: Option<ApplyReport>,
    pub data_published: Option<bool>,
    pub status_published: bool,
    pub pending_events: u32,
}

/// Actions run exactly once after a connection is first observed.
///
/// `publish_data` is false when the connection was opened to deliver a
/// report that is already queued.
pub fn run_post_connect(
    devices: &mut Devices<'_>,
    config: &mut DeviceConfig,
    status: &mut RuntimeStatus,
    sensor_healthy: bool,
    publish_data: bool,
) -> PostConnectSummary {
    let now = devices.now();
    let mut summary = PostConnectSummary::default();

    status.alert.clear_if(AlertCode::is_connectivity);

    let reading = devices.power.read_battery();
    status.update_battery(&reading, now);
    status.signal_quality = devices.radio.signal_quality();

    summary.config = reload_remote_config(devices.config_provider, config, status, now);

    if publish_data {
        let snapshot = DataSnapshot::capture(status, None, now);
        let ok = devices.publisher.publish_data_snapshot(&snapshot);
        if !ok {
            warn!(" Data snapshot publish failed");
            status.raise_alert(AlertCode::DataPublishFailed, now);
        }
        summary.data_published = Some(ok);
    }

    summary.pending_events = devices.queue.pending_count();
    let snapshot = StatusSnapshot::capture(config, status, summary.pending_events, sensor_healthy, now);
    summary.status_published = devices.publisher.publish_status_snapshot(&snapshot);
    if !summary.status_published {
        warn!(" Status snapshot publish failed");
        status.raise_alert(AlertCode::StatusPublishFailed, now);
    }

    if let Some(at) = devices.queue.last_hook_response() {
        config.set_last_hook_response(at);
        if now.saturating_sub(at) <= WEBHOOK_STALE_SECS {
            status.alert.clear_if(|a| a == AlertCode::WebhookStale);
        }
    }
    config.set_last_connection(now);

    match status.alert().filter(|a| is_systemic(*a)) {
        None => config.clear_reset_count(),
        Some(alert) => info!(" Alert {} still active, reset count {} kept", alert.code(), config.reset_count()),
    }
    summary
}
