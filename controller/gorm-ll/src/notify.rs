//! Host notifications
//!
//! The link layer tells the host about state changes of a connection slot through an
//! [`EventSink`]. Notifications are sent from interrupt context, so an implementation must never
//! block. Three implementations are provided:
//!
//! * [`EventFlags`] keeps one bit per event and connection slot, to be polled by a thread.
//! * `tokio::sync::mpsc::UnboundedSender` (requires feature *tokio*)
//! * `futures::channel::mpsc::UnboundedSender` (requires feature *futures-rs*)

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};
use gorm_core::ConnHandle;

/// An event of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    /// A connection was established
    Connected,
    /// A connection could not be established
    ConnAbort,
    /// The connection was closed by either side
    ConnClosed,
    /// The supervision timeout of the connection expired
    ConnTimeout,
    /// Data was pushed to the RX queue of the connection
    Data,
}

impl Event {
    const ALL: [Event; 5] = [
        Event::Connected,
        Event::ConnAbort,
        Event::ConnClosed,
        Event::ConnTimeout,
        Event::Data,
    ];

    fn bit(self) -> u8 {
        match self {
            Event::Connected => 1 << 0,
            Event::ConnAbort => 1 << 1,
            Event::ConnClosed => 1 << 2,
            Event::ConnTimeout => 1 << 3,
            Event::Data => 1 << 4,
        }
    }
}

/// A receiver of link layer events
pub trait EventSink {
    fn notify(&self, handle: ConnHandle, event: Event);
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn notify(&self, handle: ConnHandle, event: Event) {
        (**self).notify(handle, event)
    }
}

/// A set of [`Event`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(u8);

impl EventSet {
    pub fn contains(&self, event: Event) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate over the events of the set
    ///
    /// Events are yielded in the order of their declaration within [`Event`].
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        Event::ALL.into_iter().filter(move |event| self.contains(*event))
    }
}

/// Event flags for every connection slot
///
/// An event sets a flag of the slot, and [`take`](EventFlags::take) reads and clears every flag
/// of a slot. Events of the same kind are coalesced until they are taken.
#[derive(Debug)]
pub struct EventFlags {
    flags: Box<[AtomicU8]>,
}

impl EventFlags {
    pub fn new(connections: usize) -> Self {
        let flags = (0..connections)
            .map(|_| AtomicU8::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        EventFlags { flags }
    }

    /// Take the events of the connection slot
    pub fn take(&self, handle: ConnHandle) -> EventSet {
        self.flags
            .get(handle.index())
            .map(|flags| EventSet(flags.swap(0, Ordering::AcqRel)))
            .unwrap_or_default()
    }
}

impl EventSink for EventFlags {
    fn notify(&self, handle: ConnHandle, event: Event) {
        match self.flags.get(handle.index()) {
            Some(flags) => {
                flags.fetch_or(event.bit(), Ordering::AcqRel);
            }
            None => log::warn!("(LL) event {:?} for unknown connection slot {}", event, handle),
        }
    }
}

#[cfg(feature = "tokio")]
impl EventSink for tokio::sync::mpsc::UnboundedSender<(ConnHandle, Event)> {
    fn notify(&self, handle: ConnHandle, event: Event) {
        if self.send((handle, event)).is_err() {
            log::debug!("(LL) event receiver dropped, {:?} of slot {} is lost", event, handle)
        }
    }
}

#[cfg(feature = "futures-rs")]
impl EventSink for futures::channel::mpsc::UnboundedSender<(ConnHandle, Event)> {
    fn notify(&self, handle: ConnHandle, event: Event) {
        if self.unbounded_send((handle, event)).is_err() {
            log::debug!("(LL) event receiver dropped, {:?} of slot {} is lost", event, handle)
        }
    }
}
