use log::{debug, info, warn};

use super::{AppRunState, AppState, Control};
use crate::alerts::AlertCode;
use crate::battery::is_boundary_aligned;
use crate::clock::LocalTime;
use crate::connectivity::DisconnectProgress;
use crate::platform::{DeepSleepResult, Devices};
use crate::sleep::{SleepInputs, SleepPlanner, Strategy, WakeCause};

impl AppState {
    pub(super) fn handle_sleeping(&mut self, dev: &mut Devices<'_>) -> Control {
        let connected_mode = self.config.is_connected_mode();

        if connected_mode && self.is_open(dev) {
            info!(" Open hours started, not sleeping");
            return self.transition(AppRunState::Idle);
        }

        let online = dev.radio.is_connected();
        if online && !dev.queue.is_safe_to_sleep(true) {
            debug!(" Waiting for {} queued events before sleep", dev.queue.pending_count());
            return Control::Continue;
        }

        let now_ms = dev.uptime_ms();
        let progress = self.disconnect.step(
            dev.radio,
            self.config.cloud_disconnect_budget_secs(),
            self.config.modem_off_budget_secs(),
            now_ms,
        );
        match progress {
            DisconnectProgress::Pending => return Control::Continue,
            DisconnectProgress::TimedOut { elapsed_secs } if connected_mode => {
                warn!(" Radio still up after {}s", elapsed_secs);
                self.status.raise_alert(AlertCode::ModemFault, dev.now());
                return self.transition(AppRunState::Error);
            }
            DisconnectProgress::TimedOut { elapsed_secs } => {
                warn!(" Radio still up after {}s, sleeping anyway", elapsed_secs);
            }
            DisconnectProgress::Done => {
                if self.status.alert.clear_if(|a| a == AlertCode::ModemFault) {
                    info!(" Radio powered down, modem fault cleared");
                }
            }
        }

        self.sleep_now(dev)
    }

    fn sleep_inputs(&self, dev: &Devices<'_>) -> SleepInputs {
        SleepInputs {
            now: dev.now(),
            time_valid: dev.clock.is_valid(),
            interval_secs: self.effective_interval(),
            open_hours: self.config.open_hours(),
            local: LocalTime::from_clock(dev.clock),
            debounce_remaining_ms: self.counting.debounce_remaining_ms(
                self.config.occupancy_debounce_ms(),
                &self.status,
                dev.uptime_ms(),
            ),
            sensor_interrupt: self.sensors.uses_interrupt(),
        }
    }

    /// Run the planned sleep. Returns only for sleeps that resume in place.
    fn sleep_now(&mut self, dev: &mut Devices<'_>) -> Control {
        let inputs = self.sleep_inputs(dev);
        let mut plan = self.planner.plan(&inputs);

        if plan.strategy == Strategy::Deep {
            self.sensors.power_down();
            self.counting.close_occupancy(&mut self.status, inputs.now);
            self.flush(dev.store);

            info!(" Deep sleep for {}s", plan.seconds);
            match dev.sleep.deep_sleep(plan.seconds, plan.wake) {
                DeepSleepResult::Restarting => return Control::Restart,
                DeepSleepResult::ResumedWithoutReset => {
                    self.status.raise_alert(AlertCode::SleepFault, dev.now());
                    self.planner.mark_deep_unreliable();
                    plan = SleepPlanner::timed_plan(&self.sleep_inputs(dev));
                }
            }
        }

        if !plan.wake.sensor_interrupt {
            self.sensors.power_down();
        }
        self.flush(dev.store);

        info!(" Timed sleep for {}s", plan.seconds);
        let pins = dev.sleep.timed_sleep(plan.seconds, plan.wake);
        self.on_wake(dev, WakeCause::classify(pins))
    }

    /// Re-power the sensor, account for the wake event and pick the next
    /// state.
    fn on_wake(&mut self, dev: &mut Devices<'_>, cause: WakeCause) -> Control {
        let now = dev.now();
        let open = self.is_open(dev);
        info!(" Woke by {:?}", cause);

        if open {
            self.planner.observe_open();
            self.ensure_sensor(now);
        }

        match cause {
            WakeCause::ManualOverride => {
                dev.button_flag.take();
            }
            WakeCause::Sensor => {
                // The edge that woke us counts once, whether or not it also
                // latched the flag.
                dev.sensor_flag.take();
                self.counting
                    .record_event(self.config.counting_mode(), &mut self.status, now, dev.uptime_ms());
            }
            WakeCause::Timer => {}
        }

        let connected_mode = self.config.is_connected_mode();
        let scheduled = cause == WakeCause::Timer
            && dev.clock.is_valid()
            && is_boundary_aligned(now, self.effective_interval());

        let next = match cause {
            WakeCause::ManualOverride => AppRunState::Connecting,
            _ if connected_mode && open => AppRunState::Connecting,
            _ if scheduled || self.report_due(now) => AppRunState::Reporting,
            WakeCause::Sensor if !connected_mode => AppRunState::Sleeping,
            _ => AppRunState::Idle,
        };
        self.transition(next)
    }
}
