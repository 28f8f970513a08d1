use log::{debug, info, warn};

use super::{AppRunState, AppState, Control};
use crate::alerts::AlertCode;
use crate::battery::is_boundary_aligned;
use crate::clock::{LocalTime, SECS_PER_HOUR};
use crate::config::OperatingMode;
use crate::platform::Devices;
use crate::report::{DataSnapshot, OutboundEvent};
use crate::supervisor::WEBHOOK_STALE_SECS;

/// Offline longer than this (or three effective intervals, if longer) raises
/// the prolonged-offline alert.
pub const PROLONGED_OFFLINE_SECS: u32 = 6 * SECS_PER_HOUR;

impl AppState {
    pub(super) fn handle_reporting(&mut self, dev: &mut Devices<'_>) -> Control {
        let now = dev.now();
        let time_valid = dev.clock.is_valid();
        let offset = dev.clock.utc_offset_secs();

        let credited = self.status.credit_open_occupancy(now);
        if credited > 0 {
            debug!(" Occupancy still open, {}s credited to this period", credited);
        }

        let last_report = self.config.last_report();
        if time_valid && last_report != 0 {
            let today = LocalTime::from_unix(now, offset).day_number;
            if LocalTime::from_unix(last_report, offset).day_number < today {
                self.status.reset_daily();
            }
        }

        let reading = dev.power.read_battery();
        self.status.update_battery(&reading, now);

        let sample = self.sensors.sample();
        let snapshot = DataSnapshot::capture(&self.status, sample, now);
        if dev.queue.enqueue(OutboundEvent::Report(snapshot)) {
            info!(
                " Report queued: hourly {}, daily {}, occupied {}s",
                snapshot.hourly_count, snapshot.daily_count, snapshot.hourly_occupancy_secs
            );
        } else {
            warn!(" Report could not be queued");
            self.status.raise_alert(AlertCode::DataPublishFailed, now);
        }

        self.status.reset_hourly();
        self.config.set_last_report(now);

        if time_valid {
            self.evaluate_connection_health(now);
        }

        if dev.radio.is_connected() {
            return self.transition(AppRunState::Idle);
        }

        let next = match self.config.operating_mode() {
            OperatingMode::Connected => AppRunState::Connecting,
            OperatingMode::LowPower => {
                let interval = self.effective_interval();
                let aligned = is_boundary_aligned(now, interval);
                let stale_hook = self.status.alert() == Some(AlertCode::WebhookStale);
                if aligned || stale_hook {
                    AppRunState::Connecting
                } else {
                    info!(" Connection deferred, {}s off the {}s boundary", now % interval, interval);
                    AppRunState::Idle
                }
            }
            OperatingMode::Disconnected => AppRunState::Idle,
        };
        self.transition(next)
    }

    /// Raise the prolonged-offline and webhook-staleness alerts from the
    /// persisted connection timestamps. Requires a valid wall clock.
    fn evaluate_connection_health(&mut self, now: u32) {
        let last_connection = self.config.last_connection();
        let last_hook = self.config.last_hook_response();

        if self.config.operating_mode() != OperatingMode::Disconnected && last_connection != 0 {
            let threshold = PROLONGED_OFFLINE_SECS.max(self.effective_interval().saturating_mul(3));
            let offline = now.saturating_sub(last_connection);
            if offline > threshold {
                warn!(" Offline for {}s (threshold {}s)", offline, threshold);
                self.status.raise_alert(AlertCode::ProlongedOffline, now);
            }
        }

        if !self.suppress_webhook_alert
            && last_hook != 0
            && last_connection > last_hook
            && now.saturating_sub(last_hook) > WEBHOOK_STALE_SECS
        {
            warn!(" No webhook response for {}s", now.saturating_sub(last_hook));
            self.status.raise_alert(AlertCode::WebhookStale, now);
        }
    }
}
