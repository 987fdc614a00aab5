//! Gorm Link Layer
//!
//! This is the link layer of a BLE peripheral. It advertises (connectable and scannable
//! undirected advertising), accepts a single `CONNECT_IND`, and then maintains the connection
//! with the central: connection event timing, channel hopping, acknowledgements, and the LL
//! control procedures a peripheral must respond to.
//!
//! The link layer runs entirely within interrupt context. It is driven by two entry points,
//! [`LinkLayer::on_radio_event`] for the completion of a radio operation and
//! [`LinkLayer::on_timer`] for an expired timer. The host only interacts with the link layer
//! through the [`Stack`] (the RX and TX queues of every connection slot) and the
//! [`EventSink`](notify::EventSink) notifications.
//!
//! ```
//! # use gorm_core::{ConnHandle, Stack};
//! # use gorm_ll::{AdvParams, LinkLayer, State};
//! # use gorm_ll::notify::EventFlags;
//! # fn example<R, T, G>(radio: R, timer: T, rng: G)
//! # where R: gorm_ll::radio::RadioDriver, T: gorm_ll::timer::Timer, G: rand_core::RngCore {
//! let stack: &'static Stack = Box::leak(Box::new(Stack::new(16, 1)));
//!
//! let flags: &'static EventFlags = Box::leak(Box::new(EventFlags::new(1)));
//!
//! let mut ll = LinkLayer::new(stack, radio, timer, flags, rng);
//!
//! let params = AdvParams::new([1, 2, 3, 4, 5, 6], 100_000);
//!
//! ll.advertise(ConnHandle::new(0), params).unwrap();
//!
//! assert_eq!(State::Advertising, ll.state(ConnHandle::new(0)));
//! # }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

mod advertiser;
pub mod channel;
pub mod config;
mod connection;
mod control;
pub mod notify;
pub mod pdu;
pub mod radio;
pub mod timer;

pub use advertiser::AdvParams;
pub use connection::ConnectionInfo;

use advertiser::Advertiser;
use alloc::boxed::Box;
use alloc::vec::Vec;
use connection::Connection;
use core::fmt::{Display, Formatter};
use gorm_core::buffer::Buf;
use gorm_core::{ConnHandle, Stack};
use notify::EventSink;
use radio::{RadioDriver, RadioEvent, Transceiver};
use rand_core::RngCore;
use timer::{Timer, TimerId, TimerKind};

/// The state of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum State {
    Standby,
    Advertising,
    Connected,
}

/// Error returned by the operations of a [`LinkLayer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlError {
    /// Not enough buffers are free
    NoBuffer,
    /// The handle does not refer to a connection slot
    InvalidHandle(ConnHandle),
    /// The connection slot is not in the standby state
    BusyState(State),
    /// Another connection slot is already advertising
    AlreadyAdvertising(ConnHandle),
    /// The advertising data is too large
    InvalidAdvData(usize),
    /// The connection slot is not connected
    NotConnected,
}

impl Display for LlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            LlError::NoBuffer => f.write_str("no free buffers"),
            LlError::InvalidHandle(handle) => write!(f, "no connection slot for handle {}", handle),
            LlError::BusyState(state) => write!(f, "connection slot is in state {:?}", state),
            LlError::AlreadyAdvertising(handle) => {
                write!(f, "connection slot {} is already advertising", handle)
            }
            LlError::InvalidAdvData(len) => write!(f, "advertising data of {} bytes is too large", len),
            LlError::NotConnected => f.write_str("connection slot is not connected"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LlError {}

/// The continuation of a radio operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Callback {
    AdvTx,
    AdvRx,
    ScanRspTx,
    ConnRx,
    ConnTx,
}

/// What the event timer of a connection slot means when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    AdvEventStart,
    AdvVisitEnd,
    ConnEventStart,
    ConnRxTimeout,
}

pub(crate) enum Mode {
    Standby,
    Advertising(Advertiser),
    Connected(Connection),
}

/// A connection slot
pub(crate) struct Slot {
    pub(crate) mode: Mode,
    pub(crate) step: Step,
    /// The PDU being sent (or to be re-sent)
    pub(crate) in_tx: Option<Buf>,
    /// The buffer the next received PDU is written to
    pub(crate) in_rx: Option<Buf>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            mode: Mode::Standby,
            step: Step::AdvEventStart,
            in_tx: None,
            in_rx: None,
        }
    }

    fn state(&self) -> State {
        match self.mode {
            Mode::Standby => State::Standby,
            Mode::Advertising(_) => State::Advertising,
            Mode::Connected(_) => State::Connected,
        }
    }
}

/// The link layer
///
/// A `LinkLayer` owns the radio, the timer, and the per slot state of the link layer. It must be
/// placed where it can be accessed mutably by both the radio interrupt and the timer interrupt
/// (usually within a `critical_section::Mutex`, or an interrupt safe cell of the platform).
pub struct LinkLayer<R, T, N, G>
where
    R: RadioDriver,
{
    stack: &'static Stack,
    radio: Transceiver<R, Callback>,
    timer: T,
    sink: N,
    rng: G,
    slots: Box<[Slot]>,
}

impl<R, T, N, G> LinkLayer<R, T, N, G>
where
    R: RadioDriver,
    T: Timer,
    N: EventSink,
    G: RngCore,
{
    /// Create a new `LinkLayer`
    ///
    /// There is one connection slot for every link of `stack`, every slot starts in the standby
    /// state.
    pub fn new(stack: &'static Stack, radio: R, timer: T, sink: N, rng: G) -> Self {
        let slots = stack.handles().map(|_| Slot::new()).collect::<Vec<_>>().into_boxed_slice();

        LinkLayer {
            stack,
            radio: Transceiver::new(radio),
            timer,
            sink,
            rng,
            slots,
        }
    }

    /// Get the state of a connection slot
    ///
    /// An invalid handle is always in the standby state.
    pub fn state(&self, handle: ConnHandle) -> State {
        self.slots.get(handle.index()).map(Slot::state).unwrap_or(State::Standby)
    }

    /// Get information on the connection of a connection slot
    pub fn connection_info(&self, handle: ConnHandle) -> Option<ConnectionInfo> {
        match &self.slots.get(handle.index())?.mode {
            Mode::Connected(connection) => Some(connection.info()),
            _ => None,
        }
    }

    pub fn stack(&self) -> &'static Stack {
        self.stack
    }

    pub fn driver(&self) -> &R {
        self.radio.driver()
    }

    pub fn driver_mut(&mut self) -> &mut R {
        self.radio.driver_mut()
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub(crate) fn slot_mut(&mut self, handle: ConnHandle) -> Result<&mut Slot, LlError> {
        self.slots
            .get_mut(handle.index())
            .ok_or(LlError::InvalidHandle(handle))
    }

    /// Take both in-flight buffers of a slot and return them to the pool
    pub(crate) fn release_buffers(&mut self, handle: ConnHandle) {
        let pool = self.stack.pool();

        if let Some(slot) = self.slots.get_mut(handle.index()) {
            slot.in_tx.take().into_iter().chain(slot.in_rx.take()).for_each(|buf| pool.release(buf));
        }
    }

    /// Handle the completion of a radio operation
    ///
    /// This must be called from the radio interrupt.
    pub fn on_radio_event(&mut self, event: RadioEvent) {
        let Some(completion) = self.radio.complete(event) else {
            return;
        };

        let handle = completion.owner;

        match (self.state(handle), completion.callback) {
            (State::Advertising, Callback::AdvTx) => self.adv_tx_done(handle),
            (State::Advertising, Callback::AdvRx) => self.adv_rx_done(handle),
            (State::Advertising, Callback::ScanRspTx) => self.scan_rsp_done(handle),
            (State::Connected, Callback::ConnRx) => self.conn_rx_done(handle),
            (State::Connected, Callback::ConnTx) => self.conn_tx_done(handle),
            (state, callback) => {
                log::debug!("(LL) stale radio callback {:?} for slot {} in state {:?}", callback, handle, state)
            }
        }
    }

    /// Handle an expired timer
    ///
    /// This must be called from the timer interrupt (or whatever context the radio interrupt
    /// is in).
    pub fn on_timer(&mut self, id: TimerId) {
        let Some(slot) = self.slots.get(id.handle.index()) else {
            log::warn!("(LL) timer for unknown slot {}", id.handle);

            return;
        };

        match (slot.state(), id.kind, slot.step) {
            (State::Advertising, TimerKind::Event, Step::AdvEventStart) => self.adv_event_start(id.handle),
            (State::Advertising, TimerKind::Event, Step::AdvVisitEnd) => self.adv_visit_end(id.handle),
            (State::Connected, TimerKind::Event, Step::ConnEventStart) => self.conn_event_start(id.handle),
            (State::Connected, TimerKind::Event, Step::ConnRxTimeout) => self.conn_rx_timeout(id.handle),
            (State::Connected, TimerKind::Supervision, _) => self.supervision_timeout(id.handle),
            (state, kind, step) => {
                log::trace!("(LL) stale timer {:?}/{:?} for slot {} in state {:?}", kind, step, id.handle, state)
            }
        }
    }
}
