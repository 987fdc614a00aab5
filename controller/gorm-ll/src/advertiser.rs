//! Connectable undirected advertising

use crate::config::{self, ADV_CHANNELS, ADV_EVENT_DURATION};
use crate::notify::EventSink;
use crate::pdu::{AdvHeader, AdvPduType};
use crate::radio::{RadioContext, RadioDriver};
use crate::timer::{Timer, TimerId};
use crate::{Callback, LinkLayer, LlError, Mode, State, Step};
use gorm_core::buffer::{Buffer, BufferError};
use gorm_core::ConnHandle;
use rand_core::RngCore;

#[derive(Clone, Copy)]
struct AdvData {
    len: u8,
    data: [u8; config::ADV_DATA_MAX],
}

impl AdvData {
    const fn new() -> Self {
        AdvData {
            len: 0,
            data: [0; config::ADV_DATA_MAX],
        }
    }

    fn set(&mut self, data: &[u8]) -> Result<(), LlError> {
        if data.len() > config::ADV_DATA_MAX {
            return Err(LlError::InvalidAdvData(data.len()));
        }

        self.data[..data.len()].copy_from_slice(data);

        self.len = data.len() as u8;

        Ok(())
    }

    fn get(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl core::fmt::Debug for AdvData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self.get(), f)
    }
}

/// Advertising parameters
///
/// ```
/// # use gorm_ll::AdvParams;
/// let mut params = AdvParams::new([0xC0, 1, 2, 3, 4, 5], 100_000).random_address();
///
/// // flags, then the complete local name "gorm"
/// params.set_adv_data(&[2, 0x01, 0x06, 5, 0x09, b'g', b'o', b'r', b'm']).unwrap();
///
/// assert!(params.set_scan_rsp_data(&[0; 32]).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AdvParams {
    address: [u8; 6],
    random_address: bool,
    interval: u32,
    adv_data: AdvData,
    scan_rsp_data: AdvData,
}

impl AdvParams {
    /// Create new advertising parameters
    ///
    /// `address` is the device address in the over the air (little endian) order. The interval
    /// is in microseconds and is clamped to the range [`ADV_INTERVAL_MIN`] to
    /// [`ADV_INTERVAL_MAX`].
    ///
    /// [`ADV_INTERVAL_MIN`]: config::ADV_INTERVAL_MIN
    /// [`ADV_INTERVAL_MAX`]: config::ADV_INTERVAL_MAX
    pub fn new(address: [u8; 6], interval: u32) -> Self {
        let clamped = interval.clamp(config::ADV_INTERVAL_MIN, config::ADV_INTERVAL_MAX);

        if clamped != interval {
            log::debug!("(LL) advertising interval {}us clamped to {}us", interval, clamped);
        }

        AdvParams {
            address,
            random_address: false,
            interval: clamped,
            adv_data: AdvData::new(),
            scan_rsp_data: AdvData::new(),
        }
    }

    /// Mark the address as a random device address
    pub fn random_address(mut self) -> Self {
        self.random_address = true;
        self
    }

    /// Set the data of the `ADV_IND`
    pub fn set_adv_data(&mut self, data: &[u8]) -> Result<(), LlError> {
        self.adv_data.set(data)
    }

    /// Set the data of the `SCAN_RSP`
    pub fn set_scan_rsp_data(&mut self, data: &[u8]) -> Result<(), LlError> {
        self.scan_rsp_data.set(data)
    }

    pub fn address(&self) -> [u8; 6] {
        self.address
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    fn write_pdu(&self, buffer: &mut Buffer, pdu_type: AdvPduType, data: &AdvData) -> Result<(), BufferError> {
        buffer.flags = AdvHeader::new(pdu_type, self.random_address).0;

        buffer.set_data(&self.address)?;

        buffer.extend_from_slice(data.get())
    }

    /// Check if an `AdvA` field received from a peer is addressed to this device
    fn is_addressed(&self, header: AdvHeader, adv_a: &[u8]) -> bool {
        header.rx_add() == self.random_address && *adv_a == self.address
    }
}

/// The advertising state of a connection slot
pub(crate) struct Advertiser {
    params: AdvParams,
    channel_index: usize,
    /// The start of the current advertising event
    event_start: u32,
}

impl<R, T, N, G> LinkLayer<R, T, N, G>
where
    R: RadioDriver,
    T: Timer,
    N: EventSink,
    G: RngCore,
{
    /// Start advertising on a connection slot
    ///
    /// The slot must be in the standby state and no other slot may be advertising. Advertising
    /// continues until a `CONNECT_IND` is received or [`stop_advertising`] is called.
    ///
    /// [`stop_advertising`]: LinkLayer::stop_advertising
    pub fn advertise(&mut self, handle: ConnHandle, params: AdvParams) -> Result<(), LlError> {
        let state = self.slot_mut(handle)?.state();

        if state != State::Standby {
            return Err(LlError::BusyState(state));
        }

        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| matches!(slot.mode, Mode::Advertising(_)))
        {
            return Err(LlError::AlreadyAdvertising(ConnHandle::new(index as u8)));
        }

        let mut buffers = self.stack.pool().allocate(2).ok_or(LlError::NoBuffer)?;

        let event_start = self.timer.now();

        let slot = self.slot_mut(handle)?;

        slot.in_tx = buffers.next();
        slot.in_rx = buffers.next();

        slot.mode = Mode::Advertising(Advertiser {
            params,
            channel_index: 0,
            event_start,
        });

        log::debug!("(LL) slot {} advertising every {}us", handle, params.interval);

        self.adv_visit(handle);

        Ok(())
    }

    /// Stop advertising on a connection slot
    ///
    /// This does nothing if the slot is not advertising.
    pub fn stop_advertising(&mut self, handle: ConnHandle) -> Result<(), LlError> {
        let slot = self.slot_mut(handle)?;

        if !matches!(slot.mode, Mode::Advertising(_)) {
            return Ok(());
        }

        slot.mode = Mode::Standby;

        self.timer.cancel(TimerId::event(handle));

        if self.radio.is_bound_to(handle) {
            self.radio.stop();
        }

        self.release_buffers(handle);

        log::debug!("(LL) slot {} stopped advertising", handle);

        Ok(())
    }

    pub(crate) fn adv_event_start(&mut self, handle: ConnHandle) {
        if let Some(Mode::Advertising(advertiser)) = self.slots.get_mut(handle.index()).map(|slot| &mut slot.mode) {
            advertiser.channel_index = 0;
        }

        self.adv_visit(handle)
    }

    /// Send the `ADV_IND` on the current advertising channel
    fn adv_visit(&mut self, handle: ConnHandle) {
        let pool = self.stack.pool();

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let Mode::Advertising(advertiser) = &slot.mode else {
            return;
        };

        let visit_start = advertiser
            .event_start
            .wrapping_add(advertiser.channel_index as u32 * ADV_EVENT_DURATION);

        slot.step = Step::AdvVisitEnd;

        self.timer
            .set(TimerId::event(handle), visit_start.wrapping_add(ADV_EVENT_DURATION));

        if self.radio.is_busy() && !self.radio.is_bound_to(handle) {
            log::debug!("(LL) radio busy, skipping advertising channel visit of slot {}", handle);

            return;
        }

        let Some(in_tx) = slot.in_tx.as_mut() else {
            return;
        };

        if let Err(e) = advertiser
            .params
            .write_pdu(pool.buffer_mut(in_tx), AdvPduType::AdvInd, &advertiser.params.adv_data)
        {
            log::error!("(LL) cannot create ADV_IND: {}", e);

            return;
        }

        let context = RadioContext {
            access_address: config::ADV_ACCESS_ADDRESS,
            crc_init: config::ADV_CRC_INIT,
            channel: ADV_CHANNELS[advertiser.channel_index],
        };

        if let Err(e) = self.radio.send(handle, &context, pool.buffer(in_tx), Callback::AdvTx) {
            log::error!("(LL) cannot send ADV_IND: {}", e);
        }
    }

    pub(crate) fn adv_visit_end(&mut self, handle: ConnHandle) {
        if self.radio.is_bound_to(handle) {
            self.radio.stop();
        }

        let jitter = self.rng.next_u32() % config::ADV_JITTER_MAX;

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let Mode::Advertising(advertiser) = &mut slot.mode else {
            return;
        };

        advertiser.channel_index += 1;

        if advertiser.channel_index < ADV_CHANNELS.len() {
            self.adv_visit(handle);
        } else {
            advertiser.event_start = advertiser
                .event_start
                .wrapping_add(advertiser.params.interval + jitter);

            slot.step = Step::AdvEventStart;

            self.timer.set(TimerId::event(handle), advertiser.event_start);
        }
    }

    pub(crate) fn adv_tx_done(&mut self, handle: ConnHandle) {
        if let Err(e) = self.radio.recv_next(Callback::AdvRx) {
            log::error!("(LL) slot {} cannot listen after ADV_IND: {}", handle, e);
        }
    }

    pub(crate) fn adv_rx_done(&mut self, handle: ConnHandle) {
        enum Received {
            Nothing,
            ScanReq,
            ConnectInd,
        }

        let now = self.timer.now();

        let pool = self.stack.pool();

        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };

        let (Mode::Advertising(advertiser), Some(in_rx)) = (&slot.mode, slot.in_rx.as_mut()) else {
            return;
        };

        let received = match self.radio.read(pool.buffer_mut(in_rx)) {
            Err(e) => {
                log::error!("(LL) cannot read received advertising channel PDU: {}", e);

                Received::Nothing
            }
            Ok(info) if !info.crc_ok => {
                log::trace!("(LL) advertising channel PDU with CRC error");

                Received::Nothing
            }
            Ok(_) => {
                let buffer = pool.buffer(in_rx);

                let header = AdvHeader(buffer.flags);

                let adv_a = buffer.data().get(6..12).unwrap_or_default();

                match header.pdu_type() {
                    Some(AdvPduType::ScanReq)
                        if buffer.len() == 12 && advertiser.params.is_addressed(header, adv_a) =>
                    {
                        Received::ScanReq
                    }
                    Some(AdvPduType::ConnectInd) if advertiser.params.is_addressed(header, adv_a) => {
                        Received::ConnectInd
                    }
                    pdu_type => {
                        log::trace!("(LL) ignoring advertising channel PDU {:?}", pdu_type);

                        Received::Nothing
                    }
                }
            }
        };

        match received {
            Received::Nothing => {
                if let Err(e) = self.radio.recv_next(Callback::AdvRx) {
                    log::error!("(LL) slot {} cannot continue listening: {}", handle, e);
                }
            }
            Received::ScanReq => {
                let Some(in_tx) = slot.in_tx.as_mut() else {
                    return;
                };

                let params = &advertiser.params;

                if let Err(e) = params.write_pdu(pool.buffer_mut(in_tx), AdvPduType::ScanRsp, &params.scan_rsp_data) {
                    log::error!("(LL) cannot create SCAN_RSP: {}", e);

                    return;
                }

                if let Err(e) = self.radio.send_next(pool.buffer(in_tx), Callback::ScanRspTx) {
                    log::error!("(LL) cannot send SCAN_RSP: {}", e);
                }
            }
            Received::ConnectInd => self.connect(handle, now),
        }
    }

    pub(crate) fn scan_rsp_done(&mut self, handle: ConnHandle) {
        log::trace!("(LL) slot {} sent SCAN_RSP", handle);
    }
}
