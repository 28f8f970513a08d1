use log::{info, warn};

use super::{AppRunState, AppState, Control};
use crate::connectivity::{ConnectProgress, reload_remote_config};
use crate::platform::Devices;

/// Hard ceiling on time spent waiting for an update, independent of the
/// configured budgets.
pub const FIRMWARE_UPDATE_CEILING_MS: u64 = 20 * 60 * 1_000;

impl AppState {
    pub(super) fn handle_firmware_update(&mut self, dev: &mut Devices<'_>) -> Control {
        let now_ms = dev.uptime_ms();

        if dev.button_flag.take() {
            info!(" Manual override, leaving firmware update");
            self.update_deferred = true;
            return self.transition(AppRunState::Idle);
        }

        let waited_ms = now_ms.saturating_sub(self.firmware.entered_ms);
        if waited_ms > FIRMWARE_UPDATE_CEILING_MS {
            warn!(" Firmware update not finished after {}s, giving up for now", waited_ms / 1_000);
            self.update_deferred = true;
            return self.transition(AppRunState::Idle);
        }

        let budget = (FIRMWARE_UPDATE_CEILING_MS / 1_000) as u32;
        let progress = self.connect.step(dev.radio, budget, now_ms);
        if progress == ConnectProgress::Pending {
            return Control::Continue;
        }

        if dev.radio.is_connected() {
            if !self.firmware.config_reloaded {
                self.firmware.config_reloaded = true;
                reload_remote_config(dev.config_provider, &mut self.config, &mut self.status, dev.clock.now());
            }
            if !dev.radio.update_pending() {
                info!(" No firmware update pending");
                self.status.update_pending = false;
                return self.transition(AppRunState::Idle);
            }
        }
        Control::Continue
    }
}
