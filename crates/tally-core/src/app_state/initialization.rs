use log::info;

use super::{AppRunState, AppState, Control};
use crate::alerts::AlertCode;
use crate::platform::{Devices, ResetReason};

impl AppState {
    pub(super) fn handle_initialization(&mut self, dev: &mut Devices<'_>) -> Control {
        let now = dev.now();
        let reason = dev.sleep.reset_reason();
        info!(
            " Boot: reason {:?}, resets {}, alert {}",
            reason,
            self.config.reset_count(),
            self.status.alert.raw_code()
        );

        if reason == ResetReason::PowerManagement {
            info!(" Power-management reset, webhook staleness not checked this boot");
            self.suppress_webhook_alert = true;
        }

        if reason == ResetReason::DeepSleepWake && self.status.alert.clear_if(|a| a == AlertCode::SleepFault) {
            info!(" Deep sleep restarted the device, sleep fault cleared");
        }

        let reading = dev.power.read_battery();
        self.status.update_battery(&reading, now);

        if self.is_open(dev) {
            self.ensure_sensor(now);
        }

        let override_asserted = dev.button_flag.take() | dev.sleep.manual_override_asserted();
        let time_valid = dev.clock.is_valid();

        if !time_valid || self.status.update_pending || override_asserted {
            info!(
                " Connecting at boot: time valid {}, update pending {}, override {}",
                time_valid, self.status.update_pending, override_asserted
            );
            self.transition(AppRunState::Connecting)
        } else {
            self.transition(AppRunState::Idle)
        }
    }
}
