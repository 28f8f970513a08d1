//! Count and occupancy accumulation
//!
//! The interrupt handler only sets the sensor flag. Once per tick the state
//! machine drains it and hands the result here, where counts and occupancy
//! time are accumulated into the runtime status.

use log::{debug, info};

use crate::config::CountingMode;
use crate::status::RuntimeStatus;

/// How long after a detection the device counts as busy with it.
pub const INDICATOR_HOLD_MS: u64 = 1_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountEvent {
    Counted,
    OccupancyStarted,
    /// Another detection while occupied restarted the debounce clock
    OccupancyExtended,
    OccupancyEnded { session_secs: u32 },
    /// Scheduled mode does not accumulate events
    Ignored,
}

#[derive(Debug, Default)]
pub struct CountingEngine {
    /// Uptime of the last detection, drives debounce and the busy indicator
    last_event_ms: Option<u64>,
}

impl CountingEngine {
    pub const fn new() -> Self {
        Self {
            last_event_ms: None,
        }
    }

    /// Per-tick service: accumulate a drained edge, then check whether an
    /// occupancy session has timed out.
    pub fn service(
        &mut self,
        edge: bool,
        mode: CountingMode,
        debounce_ms: u32,
        status: &mut RuntimeStatus,
        now: u32,
        now_ms: u64,
    ) -> Option<CountEvent> {
        let recorded = edge.then(|| self.record_event(mode, status, now, now_ms));

        if mode == CountingMode::Occupancy {
            if let Some(session_secs) = self.check_debounce(debounce_ms, status, now, now_ms) {
                return Some(CountEvent::OccupancyEnded { session_secs });
            }
        }
        recorded
    }

    /// Account for one detection.
    pub fn record_event(
        &mut self,
        mode: CountingMode,
        status: &mut RuntimeStatus,
        now: u32,
        now_ms: u64,
    ) -> CountEvent {
        match mode {
            CountingMode::Counting => {
                self.last_event_ms = Some(now_ms);
                status.record_count(now);
                debug!(" Count: hourly {}, daily {}", status.hourly_count, status.daily_count);
                CountEvent::Counted
            }
            CountingMode::Occupancy => {
                self.last_event_ms = Some(now_ms);
                if status.occupied {
                    CountEvent::OccupancyExtended
                } else {
                    status.begin_occupancy(now);
                    info!(" Occupied at {}", now);
                    CountEvent::OccupancyStarted
                }
            }
            CountingMode::Scheduled => {
                debug!(" Detection ignored in scheduled mode");
                CountEvent::Ignored
            }
        }
    }

    /// End the occupancy session once `debounce_ms` has passed without a
    /// detection. Returns the session length.
    pub fn check_debounce(
        &mut self,
        debounce_ms: u32,
        status: &mut RuntimeStatus,
        now: u32,
        now_ms: u64,
    ) -> Option<u32> {
        if !status.occupied {
            return None;
        }
        // Occupied from before this boot: the debounce clock restarts now.
        let last = *self.last_event_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(last) < u64::from(debounce_ms) {
            return None;
        }
        let session = status.end_occupancy(now);
        info!(" Unoccupied at {}, session {}s", now, session);
        Some(session)
    }

    /// Milliseconds until an open occupancy session would time out.
    pub fn debounce_remaining_ms(&self, debounce_ms: u32, status: &RuntimeStatus, now_ms: u64) -> Option<u64> {
        if !status.occupied {
            return None;
        }
        let last = self.last_event_ms.unwrap_or(now_ms);
        Some(u64::from(debounce_ms).saturating_sub(now_ms.saturating_sub(last)))
    }

    /// Close any open occupancy session, e.g. before a sleep that does not
    /// preserve memory.
    pub fn close_occupancy(&mut self, status: &mut RuntimeStatus, now: u32) -> Option<u32> {
        if !status.occupied {
            return None;
        }
        self.last_event_ms = None;
        let session = status.end_occupancy(now);
        info!(" Occupancy closed before sleep, session {}s", session);
        Some(session)
    }

    /// A detection is still being handled (indicator lit).
    pub fn in_flight(&self, now_ms: u64) -> bool {
        self.last_event_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < INDICATOR_HOLD_MS)
    }
}
