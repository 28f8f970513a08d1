//! Flags raised from interrupt context and drained by the tick

use core::cell::Cell;

use critical_section::Mutex;

/// A one-bit mailbox between an interrupt handler and the main tick.
///
/// The handler only calls [`EventFlag::signal`]. The owning component calls
/// [`EventFlag::take`] once per tick; the read and the clear happen inside
/// one critical section so an edge arriving while the tick handles the
/// previous one stays pending.
pub struct EventFlag {
    pending: Mutex<Cell<bool>>,
}

impl EventFlag {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(false)),
        }
    }

    /// Mark an event. Safe to call from interrupt context.
    pub fn signal(&self) {
        critical_section::with(|cs| self.pending.borrow(cs).set(true));
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).replace(false))
    }

    /// Look without clearing.
    pub fn is_pending(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).get())
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}
