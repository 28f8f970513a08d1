use log::{debug, info};

use super::{AppRunState, AppState, Control};
use crate::platform::Devices;
use crate::supervisor::is_systemic;

impl AppState {
    pub(super) fn handle_idle(&mut self, dev: &mut Devices<'_>) -> Control {
        let now = dev.now();
        let now_ms = dev.uptime_ms();

        if dev.button_flag.take() {
            info!(" Manual override, connecting");
            return self.transition(AppRunState::Connecting);
        }

        if let Some(alert) = self.status.alert() {
            if is_systemic(alert) && self.alert_raised_this_boot() && now_ms >= self.error_recheck_ms {
                info!(" Alert {} needs supervision", alert.code());
                return self.transition(AppRunState::Error);
            }
        }

        if !self.update_deferred && dev.radio.is_connected() && dev.radio.update_pending() {
            self.status.update_pending = true;
            return self.transition(AppRunState::FirmwareUpdate);
        }

        let connected_mode = self.config.is_connected_mode();
        if connected_mode && !self.is_open(dev) {
            return self.transition(AppRunState::Sleeping);
        }

        if self.report_due(now) {
            return self.transition(AppRunState::Reporting);
        }

        if connected_mode && !dev.radio.is_connected() {
            info!(" Offline during open hours, reconnecting");
            return self.transition(AppRunState::Connecting);
        }

        if !connected_mode
            && !self.update_waiting()
            && dev.queue.is_safe_to_sleep(dev.radio.is_connected())
            && !self.counting.in_flight(now_ms)
        {
            return self.transition(AppRunState::Sleeping);
        }

        debug!(" Idle");
        Control::Continue
    }
}
