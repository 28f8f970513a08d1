use log::{info, warn};

use super::{AppRunState, AppState, Control};
use crate::alerts::AlertCode;
use crate::connectivity::{ConnectProgress, force_radio_off, run_post_connect};
use crate::platform::Devices;

impl AppState {
    pub(super) fn handle_connecting(&mut self, dev: &mut Devices<'_>) -> Control {
        let budget = self.config.connect_budget_secs();
        let now_ms = dev.uptime_ms();
        let progress = self.connect.step(dev.radio, budget, now_ms);

        match progress {
            ConnectProgress::Pending => Control::Continue,
            ConnectProgress::JustConnected { .. } | ConnectProgress::Connected => {
                if let ConnectProgress::JustConnected { elapsed_secs } = progress {
                    info!(" Connected after {}s", elapsed_secs);
                }
                self.after_connect(dev);

                if dev.radio.update_pending() {
                    self.status.update_pending = true;
                }
                if self.update_waiting() {
                    self.transition(AppRunState::FirmwareUpdate)
                } else {
                    self.transition(AppRunState::Idle)
                }
            }
            ConnectProgress::TimedOut { elapsed_secs } => {
                warn!(" Connect timed out after {}s, radio off", elapsed_secs);
                self.status.raise_alert(AlertCode::ConnectTimeout, dev.now());
                force_radio_off(dev.radio);
                self.transition(AppRunState::Sleeping)
            }
        }
    }

    /// Post-connect actions, at most once per connect session.
    pub(super) fn after_connect(&mut self, dev: &mut Devices<'_>) {
        if self.post_connect_done {
            return;
        }
        let sensor_healthy = self.sensors.is_healthy();
        let summary = run_post_connect(
            dev,
            &mut self.config,
            &mut self.status,
            sensor_healthy,
            !self.connect_for_report,
        );
        self.post_connect_done = true;

        let rejected = summary.config.as_ref().map(|report| report.rejected.len());
        info!(
            " Connected: signal {}, battery {}%, config {}, data {}, status {}, {} events queued",
            self.status.signal_quality,
            self.status.battery_soc,
            match rejected {
                None => "not loaded",
                Some(0) => "applied",
                Some(_) => "partially applied",
            },
            match summary.data_published {
                None => "skipped",
                Some(true) => "published",
                Some(false) => "failed",
            },
            if summary.status_published { "published" } else { "failed" },
            summary.pending_events
        );
        if !self.connected_once {
            info!(" First connection this boot");
            self.connected_once = true;
        }
    }
}
