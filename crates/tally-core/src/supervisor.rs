//! Error supervisor
//!
//! Chooses the recovery action for the active alert from the persisted reset
//! count. Escalation goes soft reset, then hard power cycle, then nothing
//! more until a successful connection with no supervised alert left active
//! clears the count.

use log::{info, warn};

use crate::alerts::{AlertCode, AlertSlot};
use crate::config::OperatingMode;

/// A webhook response older than this while connections succeed counts as
/// stale.
pub const WEBHOOK_STALE_SECS: u32 = 3 * 3_600;

/// How long after a no-action decision the error state may be re-entered.
pub const ERROR_RECHECK_SECS: u32 = 3_600;

/// Pause between the recovery decision and the reset, giving logs and the
/// modem time to settle.
pub const RESET_SETTLE_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    NoAction,
    SoftReset,
    HardPowerCycle,
}

/// Inputs the supervisor consults beyond the alert itself.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorContext {
    pub reset_count: u8,
    pub mode: OperatingMode,
    pub time_valid: bool,
    pub last_hook_response: u32,
    pub now: u32,
}

/// Alerts that send the device from idle into the error state.
pub const fn is_systemic(alert: AlertCode) -> bool {
    matches!(
        alert,
        AlertCode::OutOfMemory
            | AlertCode::ModemFault
            | AlertCode::SleepFault
            | AlertCode::ConnectTimeout
            | AlertCode::WebhookStale
            | AlertCode::ProlongedOffline
    )
}

/// Decide what to do about the alert in `slot`. May clear the alert when the
/// current mode makes it irrelevant.
pub fn resolve(slot: &mut AlertSlot, ctx: &SupervisorContext) -> Resolution {
    let Some(alert) = slot.current() else {
        return Resolution::NoAction;
    };
    let resets = ctx.reset_count;

    let resolution = match alert {
        AlertCode::ConnectTimeout | AlertCode::ModemFault | AlertCode::ProlongedOffline | AlertCode::SleepFault
            if ctx.mode != OperatingMode::Connected =>
        {
            info!(" Alert {} cleared, not expected in {:?} mode", alert.code(), ctx.mode);
            slot.clear();
            Resolution::NoAction
        }
        AlertCode::OutOfMemory if resets < 3 => Resolution::SoftReset,
        AlertCode::OutOfMemory => Resolution::NoAction,
        AlertCode::ConnectTimeout | AlertCode::ModemFault | AlertCode::ProlongedOffline => match resets {
            0..=1 => Resolution::SoftReset,
            2..=3 => Resolution::HardPowerCycle,
            _ => Resolution::NoAction,
        },
        AlertCode::SleepFault => match resets {
            0 => Resolution::SoftReset,
            1..=3 => Resolution::HardPowerCycle,
            _ => Resolution::NoAction,
        },
        AlertCode::WebhookStale => {
            let stale = ctx.time_valid
                && ctx.last_hook_response != 0
                && ctx.now.saturating_sub(ctx.last_hook_response) > WEBHOOK_STALE_SECS;
            if stale && resets < 3 {
                Resolution::SoftReset
            } else {
                Resolution::NoAction
            }
        }
        _ => Resolution::NoAction,
    };

    match resolution {
        Resolution::NoAction => info!(" Alert {} ({}): no action, {} resets", alert.code(), alert.label(), resets),
        _ => warn!(" Alert {} ({}): {:?} after {} resets", alert.code(), alert.label(), resolution, resets),
    }
    resolution
}
