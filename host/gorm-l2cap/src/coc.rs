//! LE Credit Based Connection-Oriented Channels
//!
//! A connection-oriented channel (COC) is opened for a protocol/service multiplexer (PSM) either
//! by accepting a connection from the peer ([`accept`]) or by requesting a connection to the peer
//! ([`connect`]). There is at most one channel for a PSM on a connection.
//!
//! The events of a channel are delivered to the callback given when the channel was opened. An
//! SDU is delivered as a [`SduReader`] over the buffers it was received in, the buffers are
//! returned to the pool once the callback returns.
//!
//! [`accept`]: L2cap::accept
//! [`connect`]: L2cap::connect

use crate::channels::{DynChannelId, LeCid};
use crate::pdu::{self, fragment_count, KFrameSizes};
use crate::signals::{
    CommandRejectReason, CommandRejectResponse, DisconnectionRequest, DisconnectionResponse, FlowControlCreditInd,
    LeCreditBasedConnectionRequest, LeCreditBasedConnectionResponse, LeCreditBasedConnectionResponseError,
    LeCreditMps, LeCreditMtu,
};
use crate::{config, send_signal, L2cap, L2capError};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::num::NonZeroU8;
use gorm_core::buffer::queue::PduQueue;
use gorm_core::buffer::{Buf, BufferPool};
use gorm_core::{Link, Stack};

/// An event of a connection-oriented channel
pub enum CocEvent<'a> {
    /// The channel is connected
    Connected,
    /// The peer refused the connection request with this result
    Refused(u16),
    /// An SDU was received
    Sdu(SduReader<'a>),
    /// The channel was disconnected
    Disconnected,
}

impl core::fmt::Debug for CocEvent<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CocEvent::Connected => f.write_str("Connected"),
            CocEvent::Refused(result) => write!(f, "Refused({:#x})", result),
            CocEvent::Sdu(reader) => write!(f, "Sdu({} bytes)", reader.len()),
            CocEvent::Disconnected => f.write_str("Disconnected"),
        }
    }
}

pub(crate) type CocCallback = Box<dyn FnMut(CocEvent<'_>) + Send>;

/// Reader of a received SDU
///
/// Reading consumes the SDU, every buffer that is completely read is returned to the pool.
pub struct SduReader<'a> {
    pool: &'a BufferPool,
    queue: &'a PduQueue,
    len: usize,
    offset: usize,
    read: usize,
}

impl<'a> SduReader<'a> {
    fn new(pool: &'a BufferPool, queue: &'a PduQueue, len: usize) -> Self {
        SduReader {
            pool,
            queue,
            len,
            offset: 0,
            read: 0,
        }
    }

    /// Get the length of the SDU
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the next bytes of the SDU into `out`
    ///
    /// The number of bytes read is returned, this is zero once all of the SDU was read. Bytes
    /// received past the length of the SDU are never read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let limit = core::cmp::min(out.len(), self.len - self.read);

        let mut written = 0;

        while written < limit {
            let offset = self.offset;

            let to = &mut out[written..limit];

            let Some((copied, exhausted)) = self.queue.peek(self.pool, |buffer| {
                let data = buffer.data().get(offset..).unwrap_or_default();

                let amount = core::cmp::min(data.len(), to.len());

                to[..amount].copy_from_slice(&data[..amount]);

                (amount, amount == data.len())
            }) else {
                break;
            };

            written += copied;

            if exhausted {
                if let Some(buf) = self.queue.pop(self.pool) {
                    self.pool.release(buf)
                }

                self.offset = 0;
            } else {
                self.offset += copied;
            }
        }

        self.read += written;

        written
    }

    /// Read the rest of the SDU into a `Vec`
    pub fn to_vec(mut self) -> Vec<u8> {
        let mut sdu = alloc::vec![0u8; self.len];

        let mut read = 0;

        while read < sdu.len() {
            match self.read(&mut sdu[read..]) {
                0 => break,
                amount => read += amount,
            }
        }

        sdu.truncate(read);

        sdu
    }
}

/// The state of a connection-oriented channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CocState {
    /// Waiting for a connection request from the peer
    Accepting,
    /// A connection request was sent to the peer
    Connecting,
    Open,
    /// A disconnection request was sent to the peer
    Disconnecting,
}

/// Information on a connection-oriented channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CocInfo {
    pub psm: u16,
    pub state: CocState,
    pub cid_own: Option<u16>,
    pub cid_peer: u16,
    pub mtu_own: u16,
    pub mps_own: u16,
    pub mtu_peer: u16,
    pub mps_peer: u16,
    /// Credits given to the peer
    pub credits_own: u16,
    /// Credits received from the peer
    pub credits_peer: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Acceptor,
    Initiator,
}

/// The reassembly state of an SDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rx {
    Idle,
    Receiving {
        expected_len: usize,
        received: usize,
        discard: bool,
    },
}

pub(crate) struct Channel {
    pub(crate) psm: u16,
    pub(crate) role: Role,
    pub(crate) state: CocState,
    /// The identifier of the outstanding request
    pub(crate) identifier: Option<NonZeroU8>,
    pub(crate) cid_own: Option<DynChannelId>,
    pub(crate) cid_peer: u16,
    pub(crate) mtu_own: u16,
    pub(crate) mps_own: u16,
    pub(crate) mtu_peer: u16,
    pub(crate) mps_peer: u16,
    pub(crate) credits_own: u16,
    pub(crate) credits_peer: u16,
    /// Credits to be returned to the peer
    pub(crate) pending_credits: u16,
    rx: Rx,
    /// The number of K-frames received for the current SDU
    rx_frames: u16,
    rx_queue: PduQueue,
    callback: CocCallback,
}

impl Channel {
    fn new(psm: u16, mps: u16, role: Role, callback: CocCallback) -> Self {
        let state = match role {
            Role::Acceptor => CocState::Accepting,
            Role::Initiator => CocState::Connecting,
        };

        Channel {
            psm,
            role,
            state,
            identifier: None,
            cid_own: None,
            cid_peer: 0,
            mtu_own: config::COC_MTU,
            mps_own: mps,
            mtu_peer: 0,
            mps_peer: 0,
            credits_own: 0,
            credits_peer: 0,
            pending_credits: 0,
            rx: Rx::Idle,
            rx_frames: 0,
            rx_queue: PduQueue::new(),
            callback,
        }
    }

    pub(crate) fn info(&self) -> CocInfo {
        CocInfo {
            psm: self.psm,
            state: self.state,
            cid_own: self.cid_own.map(|cid| cid.get_val()),
            cid_peer: self.cid_peer,
            mtu_own: self.mtu_own,
            mps_own: self.mps_own,
            mtu_peer: self.mtu_peer,
            mps_peer: self.mps_peer,
            credits_own: self.credits_own,
            credits_peer: self.credits_peer,
        }
    }

    pub(crate) fn is_open_on(&self, cid: DynChannelId) -> bool {
        self.state == CocState::Open && self.cid_own == Some(cid)
    }

    /// Bind the channel to the channel of the peer
    fn bind(&mut self, cid_own: DynChannelId, cid_peer: u16, mtu_peer: u16, mps_peer: u16, credits_peer: u16) {
        self.cid_own = Some(cid_own);
        self.cid_peer = cid_peer;
        self.mtu_peer = mtu_peer;
        self.mps_peer = mps_peer;
        self.credits_peer = credits_peer;
        self.credits_own = config::COC_INITIAL_CREDITS;
        self.identifier = None;
        self.state = CocState::Open;
    }

    /// Return an acceptor channel to the accepting state
    fn unbind(&mut self, pool: &BufferPool) {
        self.discard_sdu(pool);

        self.state = CocState::Accepting;
        self.identifier = None;
        self.cid_own = None;
        self.cid_peer = 0;
        self.mtu_peer = 0;
        self.mps_peer = 0;
        self.credits_own = 0;
        self.credits_peer = 0;
        self.pending_credits = 0;
    }

    /// Receive an LL fragment of a K-frame
    ///
    /// The L2CAP header must already be stripped from the first fragment of the K-frame.
    pub(crate) fn receive_fragment(&mut self, pool: &BufferPool, mut buf: Buf, k_frame_start: bool) {
        let buffer = pool.buffer_mut(&mut buf);

        if k_frame_start {
            if self.credits_own == 0 {
                log::warn!("(L2CAP) K-frame received on channel {:#x} without credits", self.psm);
            }

            self.credits_own = self.credits_own.saturating_sub(1);

            self.rx_frames = self.rx_frames.saturating_add(1);
        }

        if k_frame_start && self.rx == Rx::Idle {
            let Some(&[l0, l1]) = buffer.data().get(..config::SDU_LEN_SIZE) else {
                log::debug!("(L2CAP) K-frame without SDU length on channel {:#x}", self.psm);

                pool.release(buf);

                return;
            };

            let expected_len = usize::from(<u16>::from_le_bytes([l0, l1]));

            buffer.strip_front(config::SDU_LEN_SIZE);

            let discard = expected_len > usize::from(self.mtu_own);

            if discard {
                log::debug!(
                    "(L2CAP) discarding SDU of {} bytes on channel {:#x}, larger than the MTU",
                    expected_len,
                    self.psm
                );
            }

            self.rx = Rx::Receiving {
                expected_len,
                received: 0,
                discard,
            };
        }

        let Rx::Receiving { received, discard, .. } = &mut self.rx else {
            log::trace!("(L2CAP) dropping fragment outside of an SDU on channel {:#x}", self.psm);

            pool.release(buf);

            return;
        };

        *received += buffer.len();

        if *discard {
            pool.release(buf)
        } else {
            self.rx_queue.push(pool, buf)
        }
    }

    /// Finish a received K-frame
    ///
    /// If the SDU is complete it is delivered to the callback and its credits are returned.
    pub(crate) fn end_of_k_frame(&mut self, pool: &BufferPool) {
        let Rx::Receiving {
            expected_len,
            received,
            discard,
        } = self.rx
        else {
            return;
        };

        if received < expected_len {
            return;
        }

        if received > expected_len {
            log::debug!(
                "(L2CAP) received {} bytes of a {} byte SDU on channel {:#x}, the excess is ignored",
                received,
                expected_len,
                self.psm
            );
        }

        if !discard {
            log::trace!("(L2CAP) SDU of {} bytes received on channel {:#x}", expected_len, self.psm);

            (self.callback)(CocEvent::Sdu(SduReader::new(pool, &self.rx_queue, expected_len)));
        }

        self.discard_sdu(pool);
    }

    /// Drop the current SDU
    ///
    /// The credits of the K-frames already received are returned to the peer.
    pub(crate) fn discard_sdu(&mut self, pool: &BufferPool) {
        self.rx_queue.clear(pool);

        self.rx = Rx::Idle;

        self.pending_credits = self.pending_credits.saturating_add(core::mem::take(&mut self.rx_frames));
    }

    pub(crate) fn notify(&mut self, event: CocEvent<'_>) {
        (self.callback)(event)
    }
}

impl L2cap {
    fn open<F>(&mut self, psm: u16, mps: u16, role: Role, callback: F) -> Result<(), L2capError>
    where
        F: FnMut(CocEvent<'_>) + Send + 'static,
    {
        if psm == 0 {
            return Err(L2capError::InvalidPsm);
        }

        if LeCreditMps::try_new(mps).is_err() {
            return Err(L2capError::InvalidMps);
        }

        if self.channels.iter().any(|channel| channel.psm == psm) {
            return Err(L2capError::AlreadyExists);
        }

        self.channels.push(Channel::new(psm, mps, role, Box::new(callback)));

        Ok(())
    }

    /// Accept connections from the peer for a PSM
    ///
    /// The channel is connected when the peer sends an *LE Credit Based Connection Request* for
    /// `psm`. When the peer disconnects the channel it goes back to accepting connections.
    pub fn accept<F>(&mut self, psm: u16, mps: u16, callback: F) -> Result<(), L2capError>
    where
        F: FnMut(CocEvent<'_>) + Send + 'static,
    {
        self.open(psm, mps, Role::Acceptor, callback)?;

        log::debug!("(L2CAP) accepting connections for PSM {:#x}", psm);

        Ok(())
    }

    /// Connect a channel to a PSM of the peer
    ///
    /// An *LE Credit Based Connection Request* is sent to the peer, the result is delivered to
    /// `callback` as either [`CocEvent::Connected`] or [`CocEvent::Refused`].
    pub fn connect<F>(&mut self, stack: &Stack, psm: u16, mps: u16, callback: F) -> Result<(), L2capError>
    where
        F: FnMut(CocEvent<'_>) + Send + 'static,
    {
        let link = stack.link(self.handle).ok_or(L2capError::NotConnected)?;

        self.open(psm, mps, Role::Initiator, callback)?;

        let result = self.send_connection_request(stack.pool(), link);

        if result.is_err() {
            self.channels.pop();
        }

        result
    }

    fn send_connection_request(&mut self, pool: &BufferPool, link: &Link) -> Result<(), L2capError> {
        let cid_own = self.allocate_cid().ok_or(L2capError::NoCid)?;

        let identifier = self.next_identifier();

        let channel = self.channels.last_mut().ok_or(L2capError::NoSuchChannel)?;

        let request = LeCreditBasedConnectionRequest {
            identifier,
            spsm: channel.psm,
            source_cid: cid_own.get_val(),
            mtu: channel.mtu_own,
            mps: channel.mps_own,
            initial_credits: config::COC_INITIAL_CREDITS,
        };

        send_signal(pool, link, &request)?;

        channel.cid_own = Some(cid_own);
        channel.identifier = Some(identifier);
        channel.credits_own = config::COC_INITIAL_CREDITS;

        log::debug!("(L2CAP) connecting to PSM {:#x} from CID {}", channel.psm, cid_own);

        Ok(())
    }

    /// Close the channel of a PSM
    ///
    /// An open channel is disconnected with a *Disconnection Request*, its callback receives
    /// [`CocEvent::Disconnected`] once the peer responds. A channel that is not open is removed
    /// immediately.
    pub fn close(&mut self, stack: &Stack, psm: u16) -> Result<(), L2capError> {
        let index = self
            .channels
            .iter()
            .position(|channel| channel.psm == psm)
            .ok_or(L2capError::NoSuchChannel)?;

        match self.channels[index].state {
            CocState::Open => {
                let link = stack.link(self.handle).ok_or(L2capError::NotConnected)?;

                let identifier = self.next_identifier();

                let channel = &mut self.channels[index];

                let request = DisconnectionRequest {
                    identifier,
                    destination_cid: channel.cid_peer,
                    source_cid: channel.cid_own.map(|cid| cid.get_val()).unwrap_or_default(),
                };

                send_signal(stack.pool(), link, &request)?;

                channel.discard_sdu(stack.pool());

                channel.identifier = Some(identifier);

                channel.state = CocState::Disconnecting;

                log::debug!("(L2CAP) disconnecting channel for PSM {:#x}", psm);
            }
            CocState::Disconnecting => (),
            CocState::Accepting | CocState::Connecting => {
                self.channels.remove(index);

                log::debug!("(L2CAP) removed channel for PSM {:#x}", psm);
            }
        }

        Ok(())
    }

    /// Send an SDU over the channel of a PSM
    ///
    /// The SDU is the concatenation of `sdu`. It is sent within as many K-frames as needed, no
    /// K-frame is larger than the smaller of the local MTU and the MPS of the peer. Nothing is
    /// sent if the SDU is larger than the MTU of the peer, the peer has not given enough credits,
    /// or there are not enough free buffers for the entire SDU.
    pub fn coc_send(&mut self, stack: &Stack, psm: u16, sdu: &[&[u8]]) -> Result<(), L2capError> {
        let link = stack.link(self.handle).ok_or(L2capError::NotConnected)?;

        let pool = stack.pool();

        let channel = self
            .channels
            .iter_mut()
            .find(|channel| channel.psm == psm)
            .ok_or(L2capError::NoSuchChannel)?;

        if channel.state != CocState::Open {
            return Err(L2capError::NotConnected);
        }

        let len = sdu.iter().map(|part| part.len()).sum::<usize>();

        if len > channel.mtu_peer.into() {
            return Err(L2capError::SduTooLarge);
        }

        let k_frames = KFrameSizes::new(len, core::cmp::min(channel.mtu_own, channel.mps_peer));

        let k_frame_count = k_frames.clone().count();

        if k_frame_count > channel.credits_peer.into() {
            return Err(L2capError::NoCredits);
        }

        let fragments = k_frames.clone().map(fragment_count).sum();

        let mut buffers = pool.allocate(fragments).ok_or(L2capError::NoBuffer)?;

        let mut data = (len as u16)
            .to_le_bytes()
            .into_iter()
            .chain(sdu.iter().flat_map(|part| part.iter().copied()));

        for size in k_frames {
            pdu::fragment(pool, &mut buffers, link.tx_queue(), channel.cid_peer, size, data.by_ref())?;
        }

        channel.credits_peer -= k_frame_count as u16;

        log::trace!(
            "(L2CAP) sent SDU of {} bytes in {} K-frames on channel {:#x}",
            len,
            k_frame_count,
            psm
        );

        Ok(())
    }

    /// Get the information of the channel of a PSM
    pub fn channel_info(&self, psm: u16) -> Option<CocInfo> {
        self.channels.iter().find(|channel| channel.psm == psm).map(Channel::info)
    }

    fn allocate_cid(&self) -> Option<DynChannelId> {
        DynChannelId::allocate(|id| self.channels.iter().any(|channel| channel.cid_own == Some(id)))
    }

    pub(crate) fn on_connection_request(&mut self, pool: &BufferPool, link: &Link, request: LeCreditBasedConnectionRequest) {
        let response = match self.bind_request(&request) {
            Ok(index) => {
                let channel = &self.channels[index];

                LeCreditBasedConnectionResponse {
                    identifier: request.identifier,
                    destination_cid: channel.cid_own.map(|cid| cid.get_val()).unwrap_or_default(),
                    mtu: channel.mtu_own,
                    mps: channel.mps_own,
                    initial_credits: channel.credits_own,
                    result: Ok(()),
                }
            }
            Err(e) => {
                log::debug!("(L2CAP) refusing connection for PSM {:#x}: {}", request.spsm, e);

                LeCreditBasedConnectionResponse::new_rejected(request.identifier, e)
            }
        };

        let sent = send_signal(pool, link, &response);

        if response.result.is_err() {
            return;
        }

        let Some(channel) = self
            .channels
            .iter_mut()
            .find(|channel| channel.psm == request.spsm)
        else {
            return;
        };

        match sent {
            Ok(()) => {
                log::debug!(
                    "(L2CAP) channel for PSM {:#x} connected to CID {:#x}",
                    channel.psm,
                    channel.cid_peer
                );

                channel.notify(CocEvent::Connected)
            }
            Err(e) => {
                log::warn!("(L2CAP) cannot respond to connection request: {}", e);

                channel.unbind(pool)
            }
        }
    }

    fn bind_request(&mut self, request: &LeCreditBasedConnectionRequest) -> Result<usize, LeCreditBasedConnectionResponseError> {
        let index = self
            .channels
            .iter()
            .position(|channel| channel.psm == request.spsm && channel.state == CocState::Accepting)
            .ok_or(LeCreditBasedConnectionResponseError::NoResourcesAvailable)?;

        if DynChannelId::try_new(request.source_cid).is_none() {
            return Err(LeCreditBasedConnectionResponseError::InvalidSourceCid);
        }

        if self
            .channels
            .iter()
            .any(|channel| channel.cid_peer == request.source_cid)
        {
            return Err(LeCreditBasedConnectionResponseError::SourceCidAlreadyAllocated);
        }

        if LeCreditMtu::try_new(request.mtu).is_err() || LeCreditMps::try_new(request.mps).is_err() {
            return Err(LeCreditBasedConnectionResponseError::UnacceptableParameters);
        }

        let cid_own = self
            .allocate_cid()
            .ok_or(LeCreditBasedConnectionResponseError::NoResourcesAvailable)?;

        self.channels[index].bind(
            cid_own,
            request.source_cid,
            request.mtu,
            request.mps,
            request.initial_credits,
        );

        Ok(index)
    }

    pub(crate) fn on_connection_response(&mut self, response: LeCreditBasedConnectionResponse) {
        let Some(index) = self.channels.iter().position(|channel| {
            channel.state == CocState::Connecting && channel.identifier == Some(response.identifier)
        }) else {
            log::debug!("(L2CAP) unexpected connection response ({})", response.identifier);

            return;
        };

        let valid = DynChannelId::try_new(response.destination_cid).is_some()
            && LeCreditMtu::try_new(response.mtu).is_ok()
            && LeCreditMps::try_new(response.mps).is_ok();

        match response.result {
            Ok(()) if valid => {
                let channel = &mut self.channels[index];

                let Some(cid_own) = channel.cid_own else {
                    return;
                };

                channel.bind(
                    cid_own,
                    response.destination_cid,
                    response.mtu,
                    response.mps,
                    response.initial_credits,
                );

                log::debug!("(L2CAP) channel for PSM {:#x} connected", channel.psm);

                channel.notify(CocEvent::Connected);
            }
            result => {
                let refusal = match result {
                    Ok(()) => LeCreditBasedConnectionResponseError::UnacceptableParameters,
                    Err(e) => e,
                };

                let mut channel = self.channels.remove(index);

                log::debug!("(L2CAP) connection for PSM {:#x} refused: {}", channel.psm, refusal);

                channel.notify(CocEvent::Refused(refusal.to_val()));
            }
        }
    }

    pub(crate) fn on_credit_ind(&mut self, indication: FlowControlCreditInd) {
        match self
            .channels
            .iter_mut()
            .find(|channel| channel.state == CocState::Open && channel.cid_peer == indication.cid)
        {
            Some(channel) => {
                channel.credits_peer = channel.credits_peer.saturating_add(indication.credits);

                log::trace!(
                    "(L2CAP) {} credits received, channel {:#x} has {} credits",
                    indication.credits,
                    channel.psm,
                    channel.credits_peer
                );
            }
            None => log::debug!("(L2CAP) credits for unknown CID {:#x}", indication.cid),
        }
    }

    pub(crate) fn on_disconnection_request(&mut self, pool: &BufferPool, link: &Link, request: DisconnectionRequest) {
        let found = self.channels.iter().position(|channel| {
            matches!(channel.state, CocState::Open | CocState::Disconnecting)
                && channel.cid_own.map(|cid| cid.get_val()) == Some(request.destination_cid)
                && channel.cid_peer == request.source_cid
        });

        let Some(index) = found else {
            let reject = CommandRejectResponse {
                identifier: request.identifier,
                reason: CommandRejectReason::InvalidCidInRequest {
                    local_cid: request.destination_cid,
                    remote_cid: request.source_cid,
                },
            };

            if let Err(e) = send_signal(pool, link, &reject) {
                log::warn!("(L2CAP) cannot reject disconnection request: {}", e);
            }

            return;
        };

        let response = DisconnectionResponse {
            identifier: request.identifier,
            destination_cid: request.destination_cid,
            source_cid: request.source_cid,
        };

        if let Err(e) = send_signal(pool, link, &response) {
            log::warn!("(L2CAP) cannot respond to disconnection request: {}", e);
        }

        self.disconnected(pool, index, true);
    }

    pub(crate) fn on_disconnection_response(&mut self, pool: &BufferPool, response: DisconnectionResponse) {
        match self.channels.iter().position(|channel| {
            channel.state == CocState::Disconnecting && channel.identifier == Some(response.identifier)
        }) {
            Some(index) => self.disconnected(pool, index, false),
            None => log::debug!("(L2CAP) unexpected disconnection response ({})", response.identifier),
        }
    }

    pub(crate) fn on_command_reject(&mut self, pool: &BufferPool, reject: CommandRejectResponse) {
        let Some(index) = self
            .channels
            .iter()
            .position(|channel| channel.identifier == Some(reject.identifier))
        else {
            log::debug!("(L2CAP) command rejected ({:?})", reject.reason);

            return;
        };

        match self.channels[index].state {
            CocState::Connecting => {
                let mut channel = self.channels.remove(index);

                log::debug!("(L2CAP) connection request for PSM {:#x} rejected", channel.psm);

                channel.notify(CocEvent::Refused(
                    LeCreditBasedConnectionResponseError::SpsmNotSupported.to_val(),
                ));
            }
            CocState::Disconnecting => self.disconnected(pool, index, false),
            _ => (),
        }
    }

    /// Finish the disconnection of a channel
    ///
    /// If `keep_accepting` is true and the channel was accepted, it goes back to accepting
    /// connections. Otherwise the channel is removed.
    fn disconnected(&mut self, pool: &BufferPool, index: usize, keep_accepting: bool) {
        let channel = &mut self.channels[index];

        log::debug!("(L2CAP) channel for PSM {:#x} disconnected", channel.psm);

        channel.discard_sdu(pool);

        channel.notify(CocEvent::Disconnected);

        if keep_accepting && channel.role == Role::Acceptor {
            channel.unbind(pool);
        } else {
            self.channels.remove(index);
        }
    }

    /// Return the credits of the received SDUs to the peer
    pub(crate) fn send_pending_credits(&mut self, pool: &BufferPool, link: &Link) {
        for index in 0..self.channels.len() {
            let channel = &self.channels[index];

            if channel.pending_credits == 0 || channel.state != CocState::Open {
                continue;
            }

            let identifier = self.next_identifier();

            let channel = &mut self.channels[index];

            let indication = FlowControlCreditInd {
                identifier,
                cid: channel.cid_own.map(|cid| cid.get_val()).unwrap_or_default(),
                credits: channel.pending_credits,
            };

            match send_signal(pool, link, &indication) {
                Ok(()) => {
                    channel.credits_own = channel.credits_own.saturating_add(channel.pending_credits);

                    channel.pending_credits = 0;
                }
                Err(e) => log::debug!("(L2CAP) cannot return credits yet: {}", e),
            }
        }
    }

    /// Find the open channel with the local CID `cid`
    pub(crate) fn open_channel(&mut self, cid: LeCid) -> Option<&mut Channel> {
        let LeCid::DynamicallyAllocated(cid) = cid else {
            return None;
        };

        self.channels.iter_mut().find(|channel| channel.is_open_on(cid))
    }
}
