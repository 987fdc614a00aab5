//! The host half of the stack

use alloc::vec::Vec;
use gorm_core::{ConnHandle, Stack};
use gorm_l2cap::L2cap;
use gorm_ll::notify::{Event, EventFlags};

/// The host
///
/// There is an [`L2cap`] for every connection slot of the stack. The events of the link layer
/// are given to the host either one at a time with [`on_event`](Host::on_event) or by polling
/// the [`EventFlags`] the link layer was created with.
///
/// When the connection of a slot is closed every channel of the slot is destroyed, an
/// application must accept or connect its channels again for the next connection.
pub struct Host {
    stack: &'static Stack,
    slots: Vec<L2cap>,
}

impl Host {
    pub fn new(stack: &'static Stack) -> Self {
        let slots = stack.handles().map(L2cap::new).collect();

        Host { stack, slots }
    }

    pub fn stack(&self) -> &'static Stack {
        self.stack
    }

    /// Get the L2CAP layer of a connection slot
    pub fn l2cap(&self, handle: ConnHandle) -> Option<&L2cap> {
        self.slots.get(handle.index())
    }

    /// Get the mutable L2CAP layer of a connection slot
    pub fn l2cap_mut(&mut self, handle: ConnHandle) -> Option<&mut L2cap> {
        self.slots.get_mut(handle.index())
    }

    /// Process an event of the link layer
    pub fn on_event(&mut self, handle: ConnHandle, event: Event) {
        let Some(l2cap) = self.slots.get_mut(handle.index()) else {
            log::warn!("(HOST) {:?} for unknown connection slot {}", event, handle);

            return;
        };

        match event {
            Event::Connected => log::info!("(HOST) slot {} connected", handle),
            Event::Data => l2cap.process(self.stack),
            Event::ConnAbort | Event::ConnClosed | Event::ConnTimeout => {
                log::info!("(HOST) slot {} disconnected ({:?})", handle, event);

                l2cap.reset(self.stack)
            }
        }
    }

    /// Process the pending events of every connection slot
    ///
    /// The number of events processed is returned.
    pub fn poll(&mut self, flags: &EventFlags) -> usize {
        let mut count = 0;

        for handle in self.stack.handles() {
            for event in flags.take(handle).iter() {
                self.on_event(handle, event);

                count += 1;
            }
        }

        count
    }
}

impl core::fmt::Debug for Host {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Host").field("slots", &self.slots).finish()
    }
}
