//! Timers
//!
//! The link layer schedules everything on absolute instants of a free running microsecond
//! counter. The counter wraps, so instants must only be compared by their wrapping difference.

use gorm_core::ConnHandle;

/// The purpose of a timer of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Advertising channel visits and connection event scheduling
    Event,
    /// The supervision timeout of a connection
    Supervision,
}

/// The identifier of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub handle: ConnHandle,
    pub kind: TimerKind,
}

impl TimerId {
    pub fn event(handle: ConnHandle) -> Self {
        TimerId {
            handle,
            kind: TimerKind::Event,
        }
    }

    pub fn supervision(handle: ConnHandle) -> Self {
        TimerId {
            handle,
            kind: TimerKind::Supervision,
        }
    }
}

/// A source of timers
///
/// Once the instant of an armed timer is reached the implementation must call
/// [`LinkLayer::on_timer`](crate::LinkLayer::on_timer) with the `TimerId` of the timer.
pub trait Timer {
    /// Get the current instant
    fn now(&self) -> u32;

    /// Arm the timer `id` to fire at `at`
    ///
    /// Arming a timer that is already armed replaces its instant. If `at` is not in the future
    /// the timer should fire as soon as possible.
    fn set(&mut self, id: TimerId, at: u32);

    /// Disarm the timer `id`
    ///
    /// This does nothing if the timer is not armed.
    fn cancel(&mut self, id: TimerId);
}

impl<T: Timer + ?Sized> Timer for &mut T {
    fn now(&self) -> u32 {
        (**self).now()
    }

    fn set(&mut self, id: TimerId, at: u32) {
        (**self).set(id, at)
    }

    fn cancel(&mut self, id: TimerId) {
        (**self).cancel(id)
    }
}
