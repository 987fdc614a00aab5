//! The connected state
//!
//! # Connection events
//! A connection event starts with the receive window opening `WIN_WIDENING` before the expected
//! anchor point. Every packet received from the central is answered (after `T_IFS`, which is the
//! job of the radio driver) with the PDU in the slot's `in_tx` buffer. The event continues while
//! either side has more data, and ends when the central goes quiet, a packet has a CRC error, or
//! there is nothing more to send.
//!
//! At the end of an event the pending channel map update and connection update are applied when
//! their instant is reached, the channel of the next event is selected, and the event counter is
//! incremented.
//!
//! # Acknowledgements
//! The 1 bit sequence number (SN) and next expected sequence number (NESN) of every received
//! packet are compared to the local ones:
//! * a packet whose SN equals the local NESN is new, the local NESN is incremented
//! * a packet whose NESN differs from the local SN acknowledges the last sent PDU, the local SN is
//!   incremented and the next PDU of the TX queue is taken
//!
//! A PDU that is not acknowledged stays in `in_tx` and is sent again.

use crate::channel::{ChannelMap, ChannelSelector};
use crate::config::{self, WIN_WIDENING};
use crate::control::{self, Outcome};
use crate::notify::{Event, EventSink};
use crate::pdu::{AdvHeader, ChannelMapUpdate, ConnectInd, ConnectionUpdate, ControlOpcode, DataHeader, Llid};
use crate::radio::{RadioContext, RadioDriver};
use crate::timer::{Timer, TimerId};
use crate::{Callback, LinkLayer, LlError, Mode, Step};
use gorm_core::buffer::Buffer;
use gorm_core::{ConnHandle, Error};
use rand_core::RngCore;

/// Bit flags of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ConnFlags(u8);

impl ConnFlags {
    pub(crate) const SN: u8 = 1 << 0;
    pub(crate) const NESN: u8 = 1 << 1;
    /// The anchor point of the connection is known
    pub(crate) const ANCHORED: u8 = 1 << 2;
    /// A packet was received within the current connection event
    pub(crate) const RX_IN_EVENT: u8 = 1 << 3;
    /// The last received packet had the MD bit set
    pub(crate) const PEER_MD: u8 = 1 << 4;
    /// The last sent packet had the MD bit set
    pub(crate) const MD: u8 = 1 << 5;
    pub(crate) const VERSION_SENT: u8 = 1 << 6;
    /// An `LL_TERMINATE_IND` is queued
    pub(crate) const TERMINATING: u8 = 1 << 7;

    pub(crate) fn get(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub(crate) fn set(&mut self, flag: u8, value: bool) {
        if value {
            self.0 |= flag
        } else {
            self.0 &= !flag
        }
    }

    pub(crate) fn toggle(&mut self, flag: u8) {
        self.0 ^= flag
    }
}

/// Information about an established connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionInfo {
    pub peer_address: [u8; 6],
    pub access_address: u32,
    /// Connection interval in microseconds
    pub interval: u32,
    pub latency: u16,
    /// Supervision timeout in microseconds
    pub supervision_timeout: u32,
    pub event_counter: u16,
    pub channel_map: ChannelMap,
    /// The data channel of the next connection event
    pub channel: u8,
    pub anchored: bool,
}

/// The connected state of a connection slot
pub(crate) struct Connection {
    pub(crate) context: RadioContext,
    pub(crate) flags: ConnFlags,
    pub(crate) channel_map: ChannelMap,
    pub(crate) selector: ChannelSelector,
    pub(crate) event_counter: u16,
    pub(crate) interval: u32,
    pub(crate) latency: u16,
    pub(crate) supervision_timeout: u32,
    /// The length of the receive window at the start of a connection event
    pub(crate) rx_window: u32,
    /// The expected anchor point of the current connection event
    pub(crate) anchor: u32,
    pub(crate) pending_timing: Option<ConnectionUpdate>,
    pub(crate) pending_channel_map: Option<ChannelMapUpdate>,
    pub(crate) peer_address: [u8; 6],
}

impl Connection {
    /// Create the connection for a `CONNECT_IND` received at `received_at`
    ///
    /// The first connection event is at the transmit window.
    pub(crate) fn new(connect_ind: &ConnectInd, received_at: u32) -> Self {
        let mut selector = ChannelSelector::new(connect_ind.hop);

        let channel = selector.next(&connect_ind.channel_map);

        Connection {
            context: RadioContext {
                access_address: connect_ind.access_address,
                crc_init: connect_ind.crc_init,
                channel,
            },
            flags: ConnFlags::default(),
            channel_map: connect_ind.channel_map,
            selector,
            event_counter: 0,
            interval: connect_ind.interval_us(),
            latency: connect_ind.latency,
            supervision_timeout: connect_ind.timeout_us(),
            rx_window: connect_ind.win_size_us() + 2 * WIN_WIDENING,
            anchor: received_at
                .wrapping_add(config::TRANSMIT_WIN_DELAY)
                .wrapping_add(connect_ind.win_offset_us()),
            pending_timing: None,
            pending_channel_map: None,
            peer_address: connect_ind.init_address,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            peer_address: self.peer_address,
            access_address: self.context.access_address,
            interval: self.interval,
            latency: self.latency,
            supervision_timeout: self.supervision_timeout,
            event_counter: self.event_counter,
            channel_map: self.channel_map,
            channel: self.context.channel,
            anchored: self.flags.get(ConnFlags::ANCHORED),
        }
    }

    /// The instant the receive window of the current event opens
    fn window_start(&self) -> u32 {
        self.anchor.wrapping_sub(WIN_WIDENING)
    }

    /// Close the current connection event
    ///
    /// This applies the updates whose instant is reached, selects the channel of the next event,
    /// and moves the anchor to the next event.
    fn close_event(&mut self) {
        let counter = self.event_counter;

        if let Some(update) = self.pending_channel_map.filter(|update| update.instant == counter) {
            log::debug!("(LL) new channel map {:?}", update.channel_map);

            self.channel_map = update.channel_map;

            self.pending_channel_map = None;
        }

        self.context.channel = self.selector.next(&self.channel_map);

        self.anchor = self.anchor.wrapping_add(self.interval);

        if let Some(update) = self
            .pending_timing
            .filter(|update| update.instant == counter.wrapping_add(1))
        {
            self.anchor = self
                .anchor
                .wrapping_add(update.win_offset as u32 * config::UNIT_1_25_MS);

            self.interval = update.interval as u32 * config::UNIT_1_25_MS;

            self.latency = update.latency;

            self.supervision_timeout = update.timeout as u32 * config::UNIT_10_MS;

            self.rx_window = update.win_size as u32 * config::UNIT_1_25_MS + 2 * WIN_WIDENING;

            self.flags.set(ConnFlags::ANCHORED, false);

            self.pending_timing = None;

            log::debug!(
                "(LL) connection interval is now {}us, supervision timeout {}us",
                self.interval,
                self.supervision_timeout
            );
        }

        self.flags.set(ConnFlags::RX_IN_EVENT, false);

        self.event_counter = counter.wrapping_add(1);
    }
}

/// Turn a buffer into an empty data channel PDU
fn make_empty(buffer: &mut Buffer) {
    buffer.clear();

    buffer.flags = DataHeader::new(Llid::DataCont).0;
}

impl<R, T, N, G> LinkLayer<R, T, N, G>
where
    R: RadioDriver,
    T: Timer,
    N: EventSink,
    G: RngCore,
{
    /// Terminate a connection
    ///
    /// An `LL_TERMINATE_IND` with the error code `reason` is queued ahead of any other data. The
    /// connection is closed with [`Event::ConnClosed`] once the central acknowledges it (or the
    /// supervision timeout expires).
    pub fn terminate(&mut self, handle: ConnHandle, reason: Error) -> Result<(), LlError> {
        let pool = self.stack.pool();

        let link = self.stack.link(handle).ok_or(LlError::InvalidHandle(handle))?;

        let slot = self.slot_mut(handle)?;

        let Mode::Connected(connection) = &mut slot.mode else {
            return Err(LlError::NotConnected);
        };

        if connection.flags.get(ConnFlags::TERMINATING) {
            return Ok(());
        }

        let mut buf = pool.get().ok_or(LlError::NoBuffer)?;

        control::write_control(pool.buffer_mut(&mut buf), ControlOpcode::TerminateInd, &[reason.code()]);

        link.tx_queue().push_front(pool, buf);

        connection.flags.set(ConnFlags::TERMINATING, true);

        log::debug!("(LL) terminating connection {} ({})", handle, reason);

        Ok(())
    }

    /// Establish the connection requested by the `CONNECT_IND` within the RX buffer
    pub(crate) fn connect(&mut self, handle: ConnHandle, received_at: u32) {
        let pool = self.stack.pool();

        self.timer.cancel(TimerId::event(handle));

        self.radio.stop();

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let Some(in_rx) = slot.in_rx.as_ref() else {
            return;
        };

        let buffer = pool.buffer(in_rx);

        match ConnectInd::try_from_pdu(AdvHeader(buffer.flags), buffer.data()) {
            Err(e) => {
                log::warn!("(LL) slot {} rejected CONNECT_IND: {}", handle, e);

                slot.mode = Mode::Standby;

                self.release_buffers(handle);

                self.sink.notify(handle, Event::ConnAbort);
            }
            Ok(connect_ind) => {
                let connection = Connection::new(&connect_ind, received_at);

                let window_start = connection.window_start();

                let supervision = received_at.wrapping_add(connection.supervision_timeout);

                if let Some(in_tx) = slot.in_tx.as_mut() {
                    make_empty(pool.buffer_mut(in_tx));
                }

                log::debug!(
                    "(LL) slot {} connected, interval {}us, first channel {}",
                    handle,
                    connection.interval,
                    connection.context.channel
                );

                slot.mode = Mode::Connected(connection);

                slot.step = Step::ConnEventStart;

                if let Some(link) = self.stack.link(handle) {
                    link.clear(pool);
                }

                self.timer.set(TimerId::event(handle), window_start);

                self.timer.set(TimerId::supervision(handle), supervision);

                self.sink.notify(handle, Event::Connected);
            }
        }
    }

    /// Close a connection and return the slot to standby
    pub(crate) fn close_connection(&mut self, handle: ConnHandle, event: Event) {
        self.timer.cancel(TimerId::event(handle));

        self.timer.cancel(TimerId::supervision(handle));

        if self.radio.is_bound_to(handle) {
            self.radio.stop();
        }

        self.release_buffers(handle);

        if let Some(link) = self.stack.link(handle) {
            link.clear(self.stack.pool());
        }

        if let Some(slot) = self.slots.get_mut(handle.index()) {
            slot.mode = Mode::Standby;
        }

        log::debug!("(LL) slot {} closed ({:?})", handle, event);

        self.sink.notify(handle, event);
    }

    pub(crate) fn conn_event_start(&mut self, handle: ConnHandle) {
        let pool = self.stack.pool();

        if self.radio.is_busy() && !self.radio.is_bound_to(handle) {
            log::debug!("(LL) radio busy, skipping connection event of slot {}", handle);

            return self.conn_event_close(handle);
        }

        if self.radio.is_bound_to(handle) {
            self.radio.stop();
        }

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let Mode::Connected(connection) = &slot.mode else {
            return;
        };

        if slot.in_rx.is_none() {
            slot.in_rx = pool.get();
        }

        if slot.in_rx.is_none() {
            log::debug!("(LL) no buffer to receive, skipping connection event of slot {}", handle);

            return self.conn_event_close(handle);
        }

        let rx_timeout = connection.window_start().wrapping_add(connection.rx_window);

        let context = connection.context;

        slot.step = Step::ConnRxTimeout;

        self.timer.set(TimerId::event(handle), rx_timeout);

        if let Err(e) = self.radio.recv(handle, &context, Callback::ConnRx) {
            log::error!("(LL) cannot start connection event: {}", e);

            self.conn_event_close(handle);
        }
    }

    pub(crate) fn conn_rx_timeout(&mut self, handle: ConnHandle) {
        log::trace!("(LL) slot {} receive timeout", handle);

        self.conn_event_close(handle)
    }

    pub(crate) fn conn_rx_done(&mut self, handle: ConnHandle) {
        let now = self.timer.now();

        let pool = self.stack.pool();

        self.timer.cancel(TimerId::event(handle));

        let Some(link) = self.stack.link(handle) else {
            return;
        };

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let (Mode::Connected(connection), Some(in_rx), Some(in_tx)) =
            (&mut slot.mode, slot.in_rx.as_mut(), slot.in_tx.as_mut())
        else {
            return self.conn_event_close(handle);
        };

        let crc_ok = match self.radio.read(pool.buffer_mut(in_rx)) {
            Ok(info) => info.crc_ok,
            Err(e) => {
                log::error!("(LL) cannot read received data channel PDU: {}", e);

                return self.conn_event_close(handle);
            }
        };

        let mut data_received = false;

        let mut outcome = Outcome::Consumed;

        if crc_ok {
            self.timer.set(
                TimerId::supervision(handle),
                now.wrapping_add(connection.supervision_timeout),
            );

            if !connection.flags.get(ConnFlags::RX_IN_EVENT) {
                connection.flags.set(ConnFlags::RX_IN_EVENT, true);

                if !connection.flags.get(ConnFlags::ANCHORED) {
                    connection.flags.set(ConnFlags::ANCHORED, true);

                    connection.rx_window = config::RX_TIMEOUT + 2 * WIN_WIDENING;

                    log::trace!("(LL) slot {} anchored", handle);
                }

                connection.anchor = now.wrapping_sub(config::ANCHOR_OFFSET);
            }

            let received = pool.buffer(in_rx);

            let header = DataHeader(received.flags);

            let is_empty = received.is_empty();

            connection.flags.set(ConnFlags::PEER_MD, header.md());

            let acknowledged = header.nesn() != connection.flags.get(ConnFlags::SN);

            if header.sn() == connection.flags.get(ConnFlags::NESN) {
                connection.flags.toggle(ConnFlags::NESN);

                match header.llid() {
                    _ if is_empty => (),
                    Some(Llid::Control) => {
                        if let Some(buf) = slot.in_rx.take() {
                            outcome = control::process(connection, pool, link, buf);
                        }
                    }
                    Some(Llid::DataStart | Llid::DataCont) => {
                        if let Some(buf) = slot.in_rx.take() {
                            link.rx_queue().push(pool, buf);

                            data_received = true;
                        }
                    }
                    None => log::trace!("(LL) dropping data channel PDU with reserved LLID"),
                }

                if slot.in_rx.is_none() {
                    slot.in_rx = pool.get();
                }
            } else {
                log::trace!("(LL) slot {} received a retransmission", handle);
            }

            if acknowledged {
                connection.flags.toggle(ConnFlags::SN);

                if connection.flags.get(ConnFlags::TERMINATING) && control::is_terminate_ind(pool.buffer(in_tx)) {
                    outcome = Outcome::Terminated(Error::ConnectionTerminatedByLocalHost);
                } else {
                    let next = loop {
                        match link.tx_queue().pop(pool) {
                            Some(buf) if pool.buffer(&buf).len() > config::DATA_PAYLOAD_MAX => {
                                log::warn!("(LL) dropping oversized data PDU from the TX queue");

                                pool.release(buf);
                            }
                            next => break next,
                        }
                    };

                    match next {
                        Some(buf) => {
                            if let Some(sent) = slot.in_tx.replace(buf) {
                                pool.release(sent);
                            }
                        }
                        None => make_empty(pool.buffer_mut(in_tx)),
                    }
                }
            }
        } else {
            log::trace!("(LL) slot {} received a PDU with a CRC error", handle);

            connection.flags.set(ConnFlags::PEER_MD, false);
        }

        if data_received {
            self.sink.notify(handle, Event::Data);
        }

        match outcome {
            Outcome::Terminated(reason) => {
                log::debug!("(LL) slot {} terminated: {}", handle, reason);

                return self.close_connection(handle, Event::ConnClosed);
            }
            Outcome::InstantPassed => {
                log::debug!("(LL) slot {} closed: {}", handle, Error::InstantPassed);

                return self.close_connection(handle, Event::ConnClosed);
            }
            Outcome::InvalidParameters(e) => {
                log::debug!("(LL) slot {} closed: {} ({})", handle, Error::InvalidLlParameters, e);

                return self.close_connection(handle, Event::ConnClosed);
            }
            Outcome::Consumed | Outcome::Replied => (),
        }

        let md = crc_ok && (!link.tx_queue().is_empty() || connection.flags.get(ConnFlags::PEER_MD));

        connection.flags.set(ConnFlags::MD, md);

        let sn = connection.flags.get(ConnFlags::SN);

        let nesn = connection.flags.get(ConnFlags::NESN);

        let Some(in_tx) = slot.in_tx.as_mut() else {
            return self.conn_event_close(handle);
        };

        let pdu = pool.buffer_mut(in_tx);

        pdu.flags = DataHeader(pdu.flags).with_sequence(sn, nesn, md).0;

        if let Err(e) = self.radio.send_next(pdu, Callback::ConnTx) {
            log::error!("(LL) cannot respond within connection event: {}", e);

            self.conn_event_close(handle);
        }
    }

    pub(crate) fn conn_tx_done(&mut self, handle: ConnHandle) {
        let now = self.timer.now();

        let pool = self.stack.pool();

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let Mode::Connected(connection) = &slot.mode else {
            return;
        };

        if connection.flags.get(ConnFlags::MD) {
            if slot.in_rx.is_none() {
                slot.in_rx = pool.get();
            }

            if slot.in_rx.is_some() {
                slot.step = Step::ConnRxTimeout;

                self.timer
                    .set(TimerId::event(handle), now.wrapping_add(config::IFS_RX_TIMEOUT));

                match self.radio.recv_next(Callback::ConnRx) {
                    Ok(()) => return,
                    Err(e) => log::error!("(LL) cannot continue connection event: {}", e),
                }
            }
        }

        self.conn_event_close(handle)
    }

    /// End the current connection event and schedule the next one
    pub(crate) fn conn_event_close(&mut self, handle: ConnHandle) {
        if self.radio.is_bound_to(handle) {
            self.radio.stop();
        }

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let Mode::Connected(connection) = &mut slot.mode else {
            return;
        };

        connection.close_event();

        slot.step = Step::ConnEventStart;

        self.timer.set(TimerId::event(handle), connection.window_start());
    }

    pub(crate) fn supervision_timeout(&mut self, handle: ConnHandle) {
        let terminating = match self.slots.get(handle.index()).map(|slot| &slot.mode) {
            Some(Mode::Connected(connection)) => connection.flags.get(ConnFlags::TERMINATING),
            _ => return,
        };

        log::debug!("(LL) slot {} closed: {}", handle, Error::ConnectionTimeout);

        let event = if terminating {
            Event::ConnClosed
        } else {
            Event::ConnTimeout
        };

        self.close_connection(handle, event)
    }
}
