use log::{error, info};

use super::{AppRunState, AppState, Control};
use crate::connectivity::DisconnectProgress;
use crate::platform::Devices;
use crate::supervisor::{ERROR_RECHECK_SECS, RESET_SETTLE_MS, Resolution, SupervisorContext, resolve};

impl AppState {
    pub(super) fn handle_error(&mut self, dev: &mut Devices<'_>) -> Control {
        let now_ms = dev.uptime_ms();

        if let Some((resolution, decided_ms)) = self.error.decision {
            if now_ms.saturating_sub(decided_ms) < RESET_SETTLE_MS {
                return Control::Continue;
            }
            return self.recover(dev, resolution);
        }

        let progress = self.disconnect.step(
            dev.radio,
            self.config.cloud_disconnect_budget_secs(),
            self.config.modem_off_budget_secs(),
            now_ms,
        );
        if progress == DisconnectProgress::Pending {
            return Control::Continue;
        }

        let ctx = SupervisorContext {
            reset_count: self.config.reset_count(),
            mode: self.config.operating_mode(),
            time_valid: dev.clock.is_valid(),
            last_hook_response: self.config.last_hook_response(),
            now: dev.now(),
        };
        match resolve(&mut self.status.alert, &ctx) {
            Resolution::NoAction => {
                self.error_recheck_ms = now_ms.saturating_add(u64::from(ERROR_RECHECK_SECS) * 1_000);
                self.transition(AppRunState::Idle)
            }
            resolution => {
                info!(" {:?} in {}s", resolution, RESET_SETTLE_MS / 1_000);
                self.error.decision = Some((resolution, now_ms));
                Control::Continue
            }
        }
    }

    /// Count the reset, persist everything, then pull the trigger.
    fn recover(&mut self, dev: &mut Devices<'_>, resolution: Resolution) -> Control {
        self.config.increment_reset_count();
        self.flush(dev.store);
        error!(" Recovering with {:?}, reset count {}", resolution, self.config.reset_count());

        match resolution {
            Resolution::SoftReset => dev.sleep.soft_reset(),
            Resolution::HardPowerCycle => dev.sleep.hard_power_cycle(),
            Resolution::NoAction => return self.transition(AppRunState::Idle),
        }
        Control::Restart
    }
}
