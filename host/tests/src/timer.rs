//! The virtual clock

use gorm_ll::timer::{Timer, TimerId};

/// A timer over a virtual microsecond clock
///
/// The clock only moves when the simulation moves it.
#[derive(Debug, Default)]
pub struct SimTimer {
    now: u32,
    armed: Vec<(TimerId, u32)>,
}

impl SimTimer {
    /// Get the instant a timer is armed for
    pub fn armed(&self, id: TimerId) -> Option<u32> {
        self.armed.iter().find(|(armed, _)| *armed == id).map(|(_, at)| *at)
    }

    /// Take the first timer that expires no later than `until`
    ///
    /// The clock is moved to the instant of the timer (or left alone if that is in the past).
    pub(crate) fn expire(&mut self, until: u32) -> Option<TimerId> {
        let now = self.now;

        // timers set in the past are due immediately
        let due_in = |at: u32| (at.wrapping_sub(now) as i32).max(0) as u32;

        let limit = until.wrapping_sub(now);

        let index = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, (_, at))| due_in(*at) <= limit)
            .min_by_key(|(_, (_, at))| due_in(*at))
            .map(|(index, _)| index)?;

        let (id, at) = self.armed.remove(index);

        self.now = now.wrapping_add(due_in(at));

        Some(id)
    }

    pub(crate) fn advance_to(&mut self, at: u32) {
        if (at.wrapping_sub(self.now) as i32) > 0 {
            self.now = at
        }
    }
}

impl Timer for SimTimer {
    fn now(&self) -> u32 {
        self.now
    }

    fn set(&mut self, id: TimerId, at: u32) {
        self.cancel(id);

        self.armed.push((id, at));
    }

    fn cancel(&mut self, id: TimerId) {
        self.armed.retain(|(armed, _)| *armed != id)
    }
}
