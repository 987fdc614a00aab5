//! Logical Link Control and Adaption Protocol (L2CAP)
//!
//! This is the L2CAP layer of an LE peripheral. There is one [`L2cap`] for every connection slot
//! of the [`Stack`], it processes the LL data PDUs the link layer put onto the RX queue of the
//! slot and sends its PDUs by putting them onto the TX queue of the slot.
//!
//! Received LL fragments are recombined into L2CAP PDUs and dispatched by channel identifier:
//! * The attribute protocol channel is given to the registered [`FixedChannelHandler`]
//! * The LE signalling channel is processed here, it is used to manage the connection-oriented
//!   channels
//! * Dynamically allocated channels are the [connection-oriented channels](coc)
//!
//! Anything else is dropped.
//!
//! ```
//! # use gorm_core::{ConnHandle, Stack};
//! # use gorm_l2cap::{L2cap, L2capError};
//! # use gorm_l2cap::coc::CocEvent;
//! let stack = Stack::new(16, 1);
//!
//! let mut l2cap = L2cap::new(ConnHandle::new(0));
//!
//! l2cap
//!     .accept(0x0080, 100, |event| match event {
//!         CocEvent::Sdu(reader) => println!("received {:?}", reader.to_vec()),
//!         event => println!("{:?}", event),
//!     })
//!     .unwrap();
//!
//! assert_eq!(Err(L2capError::AlreadyExists), l2cap.accept(0x0080, 100, |_| ()));
//!
//! // process whatever the link layer received
//! l2cap.process(&stack);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod channels;
pub mod coc;
pub mod config;
pub mod pdu;
pub mod signals;

use alloc::boxed::Box;
use alloc::vec::Vec;
use channels::LeCid;
use coc::{Channel, CocEvent, CocState};
use config::{FIXED_MTU, HEADER_SIZE};
use core::fmt::{Display, Formatter};
use core::num::NonZeroU8;
use gorm_core::buffer::{Buf, BufferError, BufferPool, Llid};
use gorm_core::{ConnHandle, Link, Stack};
use pdu::L2capHeader;
use signals::{CommandRejectResponse, EncodeSignal, Signal, SignalCode};

/// Error returned by the operations of [`L2cap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2capError {
    /// The PSM is zero
    InvalidPsm,
    /// The MPS is less than the minimum of 23
    InvalidMps,
    /// There is already a channel for the PSM
    AlreadyExists,
    /// There is no channel for the PSM
    NoSuchChannel,
    /// The channel (or the connection) is not connected
    NotConnected,
    /// The SDU is larger than the MTU of the peer
    SduTooLarge,
    /// The peer has not given enough credits to send the SDU
    NoCredits,
    /// Not enough buffers are free
    NoBuffer,
    /// Every dynamic channel identifier is allocated
    NoCid,
}

impl Display for L2capError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            L2capError::InvalidPsm => f.write_str("invalid PSM"),
            L2capError::InvalidMps => f.write_str("the MPS is less than 23"),
            L2capError::AlreadyExists => f.write_str("a channel already exists for the PSM"),
            L2capError::NoSuchChannel => f.write_str("no channel for the PSM"),
            L2capError::NotConnected => f.write_str("channel is not connected"),
            L2capError::SduTooLarge => f.write_str("SDU is larger than the MTU of the peer"),
            L2capError::NoCredits => f.write_str("not enough credits"),
            L2capError::NoBuffer => f.write_str("no free buffers"),
            L2capError::NoCid => f.write_str("no free channel identifier"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for L2capError {}

impl From<BufferError> for L2capError {
    fn from(_: BufferError) -> Self {
        L2capError::NoBuffer
    }
}

/// A consumer of a fixed channel
///
/// This is implemented by the protocol using the channel (for the attribute protocol channel this
/// is usually a GATT server). Every received PDU is a request, the response is written into
/// `response` and its length is returned. A return of zero means there is no response.
pub trait FixedChannelHandler {
    fn process(&mut self, request: &[u8], response: &mut [u8]) -> usize;
}

impl<F> FixedChannelHandler for F
where
    F: FnMut(&[u8], &mut [u8]) -> usize,
{
    fn process(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        self(request, response)
    }
}

/// Encode a signal and send it over the LE signalling channel
pub(crate) fn send_signal<S: EncodeSignal>(pool: &BufferPool, link: &Link, signal: &S) -> Result<(), L2capError> {
    let mut data = Vec::new();

    if let Err(never) = signal.encode(&mut data) {
        match never {}
    }

    send_pdu(pool, link, LeCid::LeSignalingChannel.to_cid(), &data)
}

/// Send a PDU over a fixed channel
fn send_pdu(pool: &BufferPool, link: &Link, cid: u16, payload: &[u8]) -> Result<(), L2capError> {
    let mut buffers = pool
        .allocate(pdu::fragment_count(payload.len()))
        .ok_or(L2capError::NoBuffer)?;

    pdu::fragment(pool, &mut buffers, link.tx_queue(), cid, payload.len(), payload.iter().copied())?;

    Ok(())
}

/// Where the rest of an incomplete PDU goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Channel(LeCid),
    Discard,
}

/// The PDU that is being recombined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Inbound {
    target: Target,
    /// The remaining number of bytes of the PDU
    remaining: usize,
}

/// The L2CAP layer of a connection slot
pub struct L2cap {
    handle: ConnHandle,
    channels: Vec<Channel>,
    inbound: Option<Inbound>,
    att: Option<Box<dyn FixedChannelHandler + Send>>,
    last_identifier: u8,
}

impl L2cap {
    pub fn new(handle: ConnHandle) -> Self {
        L2cap {
            handle,
            channels: Vec::new(),
            inbound: None,
            att: None,
            last_identifier: 0,
        }
    }

    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    /// Set the consumer of the attribute protocol channel
    pub fn set_att_handler<H>(&mut self, handler: H)
    where
        H: FixedChannelHandler + Send + 'static,
    {
        self.att = Some(Box::new(handler))
    }

    /// Get the identifier for the next signal sent
    pub(crate) fn next_identifier(&mut self) -> NonZeroU8 {
        self.last_identifier = self.last_identifier.wrapping_add(1).max(1);

        NonZeroU8::new(self.last_identifier).unwrap_or(NonZeroU8::MIN)
    }

    /// Process the PDUs received by the link layer
    ///
    /// This drains the RX queue of the link of the connection slot.
    pub fn process(&mut self, stack: &Stack) {
        let Some(link) = stack.link(self.handle) else {
            log::warn!("(L2CAP) no link for connection slot {}", self.handle);

            return;
        };

        let pool = stack.pool();

        while let Some(buf) = link.rx_queue().pop(pool) {
            match pool.buffer(&buf).llid() {
                Some(Llid::DataStart) => self.receive_start(pool, link, buf),
                Some(Llid::DataCont) => self.receive_continuation(pool, buf),
                llid => {
                    log::trace!("(L2CAP) dropping PDU with LLID {:?}", llid);

                    pool.release(buf);
                }
            }
        }

        self.send_pending_credits(pool, link);
    }

    /// Destroy every channel
    ///
    /// This must be called when the connection is closed. Open channels receive
    /// [`CocEvent::Disconnected`].
    pub fn reset(&mut self, stack: &Stack) {
        let pool = stack.pool();

        self.inbound = None;

        for mut channel in self.channels.drain(..) {
            channel.discard_sdu(pool);

            if matches!(channel.state, CocState::Open | CocState::Disconnecting) {
                channel.notify(CocEvent::Disconnected);
            }
        }

        log::debug!("(L2CAP) reset connection slot {}", self.handle);
    }

    /// Drop the PDU that is being recombined
    fn abort_inbound(&mut self, pool: &BufferPool) {
        if let Some(Inbound {
            target: Target::Channel(cid),
            ..
        }) = self.inbound.take()
        {
            if let Some(channel) = self.open_channel(cid) {
                log::debug!("(L2CAP) discarding incomplete SDU on channel {:#x}", channel.psm);

                channel.discard_sdu(pool);
            }
        }
    }

    fn receive_start(&mut self, pool: &BufferPool, link: &Link, mut buf: Buf) {
        self.abort_inbound(pool);

        let buffer = pool.buffer_mut(&mut buf);

        let Some(header) = L2capHeader::try_from_slice(buffer.data()) else {
            log::trace!("(L2CAP) dropping fragment too short for the L2CAP header");

            pool.release(buf);

            return;
        };

        let length = usize::from(header.length);

        let in_fragment = buffer.len() - HEADER_SIZE;

        if in_fragment > length {
            log::trace!("(L2CAP) dropping fragment larger than its PDU");

            pool.release(buf);

            return;
        }

        let remaining = length - in_fragment;

        let cid = LeCid::try_from_raw(header.cid);

        match cid {
            Some(LeCid::AttributeProtocol | LeCid::LeSignalingChannel) if remaining != 0 => {
                log::debug!("(L2CAP) dropping fixed channel PDU spanning multiple fragments");

                pool.release(buf);
            }
            Some(LeCid::AttributeProtocol) => {
                self.receive_att(pool, link, &buffer.data()[HEADER_SIZE..]);

                pool.release(buf);
            }
            Some(LeCid::LeSignalingChannel) => {
                self.receive_signal(pool, link, &buffer.data()[HEADER_SIZE..]);

                pool.release(buf);
            }
            Some(cid @ LeCid::DynamicallyAllocated(_)) if self.open_channel(cid).is_some() => {
                buffer.strip_front(HEADER_SIZE);

                if let Some(channel) = self.open_channel(cid) {
                    channel.receive_fragment(pool, buf, true);

                    if remaining == 0 {
                        channel.end_of_k_frame(pool);
                    }
                }

                if remaining != 0 {
                    self.inbound = Some(Inbound {
                        target: Target::Channel(cid),
                        remaining,
                    });
                }

                return;
            }
            Some(LeCid::SecurityManagerProtocol) => {
                log::trace!("(L2CAP) dropping security manager PDU");

                pool.release(buf);
            }
            _ => {
                log::trace!("(L2CAP) dropping PDU for unknown CID {:#x}", header.cid);

                pool.release(buf);
            }
        }

        if remaining != 0 {
            self.inbound = Some(Inbound {
                target: Target::Discard,
                remaining,
            });
        }
    }

    fn receive_continuation(&mut self, pool: &BufferPool, buf: Buf) {
        let Some(Inbound { target, remaining }) = self.inbound else {
            log::trace!("(L2CAP) dropping continuation fragment without a start");

            pool.release(buf);

            return;
        };

        let len = pool.buffer(&buf).len();

        if len > remaining {
            log::debug!("(L2CAP) continuation fragment exceeds the PDU length");

            pool.release(buf);

            self.abort_inbound(pool);

            return;
        }

        let remaining = remaining - len;

        self.inbound = (remaining != 0).then_some(Inbound { target, remaining });

        match target {
            Target::Channel(cid) => match self.open_channel(cid) {
                Some(channel) => {
                    channel.receive_fragment(pool, buf, false);

                    if remaining == 0 {
                        channel.end_of_k_frame(pool);
                    }
                }
                None => pool.release(buf),
            },
            Target::Discard => pool.release(buf),
        }
    }

    fn receive_att(&mut self, pool: &BufferPool, link: &Link, request: &[u8]) {
        let Some(handler) = self.att.as_mut() else {
            log::trace!("(L2CAP) dropping ATT PDU, there is no ATT handler");

            return;
        };

        let mut response = [0u8; FIXED_MTU];

        let len = handler.process(request, &mut response).min(FIXED_MTU);

        if len != 0 {
            if let Err(e) = send_pdu(pool, link, LeCid::AttributeProtocol.to_cid(), &response[..len]) {
                log::warn!("(L2CAP) cannot send ATT response: {}", e);
            }
        }
    }

    fn receive_signal(&mut self, pool: &BufferPool, link: &Link, raw: &[u8]) {
        let signal = match Signal::try_from_raw(raw) {
            Ok(signal) => signal,
            Err(e) => {
                log::debug!("(L2CAP) dropping invalid signal: {}", e);

                return;
            }
        };

        log::trace!("(L2CAP) received {:?}", signal);

        match signal {
            Signal::LeCreditBasedConnectionRequest(request) => self.on_connection_request(pool, link, request),
            Signal::LeCreditBasedConnectionResponse(response) => self.on_connection_response(response),
            Signal::FlowControlCreditInd(indication) => self.on_credit_ind(indication),
            Signal::DisconnectionRequest(request) => self.on_disconnection_request(pool, link, request),
            Signal::DisconnectionResponse(response) => self.on_disconnection_response(pool, response),
            Signal::CommandReject(reject) => self.on_command_reject(pool, reject),
            Signal::Unhandled(
                SignalCode::ConnectionParameterUpdateRequest
                | SignalCode::CreditBasedConnectionRequest
                | SignalCode::CreditBasedReconfigureRequest,
                identifier,
            )
            | Signal::Unknown(_, identifier) => {
                let reject = CommandRejectResponse::new_command_not_understood(identifier);

                if let Err(e) = send_signal(pool, link, &reject) {
                    log::warn!("(L2CAP) cannot reject signal: {}", e);
                }
            }
            Signal::Unhandled(code, _) => log::debug!("(L2CAP) ignoring {:?}", code),
        }
    }
}

impl core::fmt::Debug for L2cap {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("L2cap")
            .field("handle", &self.handle)
            .field("channels", &self.channels.iter().map(Channel::info).collect::<Vec<_>>())
            .field("inbound", &self.inbound)
            .finish()
    }
}
