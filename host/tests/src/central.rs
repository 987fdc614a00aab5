//! The scripted central
//!
//! The central keeps its own account of the connection (channel selection, event timing,
//! sequence numbers) so that the peripheral can be checked against it.

use gorm_core::buffer::Llid;
use gorm_ll::channel::ChannelMap;
use gorm_ll::config::{TRANSMIT_WIN_DELAY, UNIT_10_MS, UNIT_1_25_MS};
use gorm_ll::pdu::{AdvHeader, AdvPduType, ChannelMapUpdate, ConnectInd, ConnectionUpdate, ControlOpcode};
use std::collections::VecDeque;

const DATA_CHANNELS: u8 = 37;

/// A data channel PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    pub llid: Llid,
    pub payload: Vec<u8>,
}

impl DataPdu {
    fn empty() -> Self {
        DataPdu {
            llid: Llid::DataCont,
            payload: Vec::new(),
        }
    }
}

/// A central connected to the peripheral
#[derive(Debug, Clone)]
pub struct Central {
    pub address: [u8; 6],
    pub access_address: u32,
    pub crc_init: u32,
    pub hop: u8,
    pub channel_map: ChannelMap,
    /// In units of 1.25 ms
    pub interval: u16,
    /// In units of 10 ms
    pub timeout: u16,
    pub win_size: u8,
    pub win_offset: u16,
    /// Set the *ChSel* bit of the `CONNECT_IND`
    pub ch_sel: bool,
    last_unmapped: u8,
    channel: u8,
    event_counter: u16,
    anchor: u32,
    sn: bool,
    nesn: bool,
    current: Option<DataPdu>,
    tx: VecDeque<DataPdu>,
    received: Vec<DataPdu>,
    pending_channel_map: Option<ChannelMapUpdate>,
    pending_timing: Option<ConnectionUpdate>,
}

impl Central {
    /// Create a central using every data channel
    ///
    /// The connection interval is 100 ms and the supervision timeout is 4 seconds.
    pub fn new(hop: u8) -> Self {
        Central {
            address: [0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6],
            access_address: 0x5065_17D2,
            crc_init: 0x33_2211,
            hop,
            channel_map: ChannelMap::all(),
            interval: 80,
            timeout: 400,
            win_size: 2,
            win_offset: 0,
            ch_sel: false,
            last_unmapped: 0,
            channel: 0,
            event_counter: 0,
            anchor: 0,
            sn: false,
            nesn: false,
            current: None,
            tx: VecDeque::new(),
            received: Vec::new(),
            pending_channel_map: None,
            pending_timing: None,
        }
    }

    /// Create the `CONNECT_IND` for the advertiser `adv_address`
    pub fn connect_ind(&self, adv_address: [u8; 6], random_adv_address: bool) -> ([u8; 2], Vec<u8>) {
        let mut header = AdvHeader::new(AdvPduType::ConnectInd, false).0;

        if random_adv_address {
            header |= 1 << 7;
        }

        if self.ch_sel {
            header |= 1 << 5;
        }

        let mut payload = Vec::with_capacity(ConnectInd::LEN);

        payload.extend_from_slice(&self.address);
        payload.extend_from_slice(&adv_address);
        payload.extend_from_slice(&self.access_address.to_le_bytes());
        payload.extend_from_slice(&self.crc_init.to_le_bytes()[..3]);
        payload.push(self.win_size);
        payload.extend_from_slice(&self.win_offset.to_le_bytes());
        payload.extend_from_slice(&self.interval.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&self.timeout.to_le_bytes());
        payload.extend_from_slice(&self.channel_map.to_raw());
        payload.push(self.hop & 0x1F);

        ([header, payload.len() as u8], payload)
    }

    /// Start the connection after the `CONNECT_IND` was sent at `sent_at`
    pub fn connected(&mut self, sent_at: u32) {
        self.last_unmapped = 0;

        self.event_counter = 0;

        self.channel = self.select_channel();

        self.anchor = sent_at
            .wrapping_add(TRANSMIT_WIN_DELAY)
            .wrapping_add(u32::from(self.win_offset) * UNIT_1_25_MS);
    }

    /// Channel selection algorithm #1
    fn select_channel(&mut self) -> u8 {
        self.last_unmapped = (self.last_unmapped + self.hop) % DATA_CHANNELS;

        if self.channel_map.is_used(self.last_unmapped) {
            return self.last_unmapped;
        }

        let remapping_table = (0..DATA_CHANNELS)
            .filter(|channel| self.channel_map.is_used(*channel))
            .collect::<Vec<_>>();

        remapping_table[usize::from(self.last_unmapped) % remapping_table.len()]
    }

    /// The data channel of the current connection event
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// The anchor point of the current connection event
    pub fn anchor(&self) -> u32 {
        self.anchor
    }

    pub fn event_counter(&self) -> u16 {
        self.event_counter
    }

    pub fn interval_us(&self) -> u32 {
        u32::from(self.interval) * UNIT_1_25_MS
    }

    pub fn timeout_us(&self) -> u32 {
        u32::from(self.timeout) * UNIT_10_MS
    }

    /// Queue a PDU
    pub fn send(&mut self, llid: Llid, payload: &[u8]) {
        self.tx.push_back(DataPdu {
            llid,
            payload: payload.to_vec(),
        })
    }

    /// Queue a control PDU
    pub fn send_control(&mut self, opcode: ControlOpcode, ctr_data: &[u8]) {
        let mut payload = vec![opcode.into_raw()];

        payload.extend_from_slice(ctr_data);

        self.send(Llid::Control, &payload)
    }

    /// Queue an L2CAP PDU as LL fragments of at most 27 bytes
    pub fn send_l2cap(&mut self, cid: u16, payload: &[u8]) {
        let mut pdu = (payload.len() as u16).to_le_bytes().to_vec();

        pdu.extend_from_slice(&cid.to_le_bytes());
        pdu.extend_from_slice(payload);

        let mut llid = Llid::DataStart;

        for fragment in pdu.chunks(27) {
            self.send(llid, fragment);

            llid = Llid::DataCont;
        }
    }

    /// Queue an `LL_CHANNEL_MAP_IND`
    pub fn update_channel_map(&mut self, channel_map: ChannelMap, instant: u16) {
        let update = ChannelMapUpdate { channel_map, instant };

        self.send_control(ControlOpcode::ChannelMapInd, &update.to_ctr_data());

        self.pending_channel_map = Some(update);
    }

    /// Queue an `LL_CONNECTION_UPDATE_IND`
    pub fn update_connection(&mut self, update: ConnectionUpdate) {
        self.send_control(ControlOpcode::ConnectionUpdateInd, &update.to_ctr_data());

        self.pending_timing = Some(update);
    }

    /// Check if the central has more to send
    pub fn has_more(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Check if every queued PDU was acknowledged by the peripheral
    pub fn all_acknowledged(&self) -> bool {
        self.tx.is_empty() && self.current.as_ref().map_or(true, |pdu| pdu.payload.is_empty())
    }

    /// Get the next packet to send
    ///
    /// The last packet is sent again until the peripheral acknowledges it.
    pub fn next_packet(&mut self) -> ([u8; 2], Vec<u8>) {
        let tx = &mut self.tx;

        let pdu = self
            .current
            .get_or_insert_with(|| tx.pop_front().unwrap_or_else(DataPdu::empty));

        let mut header = pdu.llid.into_raw();

        if self.nesn {
            header |= 1 << 2;
        }

        if self.sn {
            header |= 1 << 3;
        }

        if !self.tx.is_empty() {
            header |= 1 << 4;
        }

        ([header, pdu.payload.len() as u8], pdu.payload.clone())
    }

    /// Receive a packet from the peripheral
    ///
    /// `true` is returned if the packet was new.
    pub fn receive(&mut self, header: [u8; 2], payload: &[u8]) -> bool {
        let nesn = header[0] & (1 << 2) != 0;

        let sn = header[0] & (1 << 3) != 0;

        if nesn != self.sn {
            self.sn = !self.sn;

            self.current = None;
        }

        if sn != self.nesn {
            return false;
        }

        self.nesn = !self.nesn;

        if !payload.is_empty() {
            let llid = Llid::try_from_raw(header[0]).unwrap_or(Llid::DataCont);

            self.received.push(DataPdu {
                llid,
                payload: payload.to_vec(),
            });
        }

        true
    }

    /// Move to the next connection event
    pub fn close_event(&mut self) {
        let counter = self.event_counter;

        if let Some(update) = self.pending_channel_map.filter(|update| update.instant == counter) {
            self.channel_map = update.channel_map;

            self.pending_channel_map = None;
        }

        self.channel = self.select_channel();

        self.anchor = self.anchor.wrapping_add(self.interval_us());

        if let Some(update) = self
            .pending_timing
            .filter(|update| update.instant == counter.wrapping_add(1))
        {
            self.anchor = self
                .anchor
                .wrapping_add(u32::from(update.win_offset) * UNIT_1_25_MS);

            self.interval = update.interval;

            self.timeout = update.timeout;

            self.pending_timing = None;
        }

        self.event_counter = counter.wrapping_add(1);
    }

    /// Take the PDUs received from the peripheral
    pub fn take_received(&mut self) -> Vec<DataPdu> {
        core::mem::take(&mut self.received)
    }

    /// Take the L2CAP PDUs received from the peripheral
    ///
    /// The received PDUs are recombined by their LLID. Each item is the channel identifier and
    /// the information payload. Fragments of an incomplete L2CAP PDU are kept for later.
    pub fn take_l2cap(&mut self) -> Vec<(u16, Vec<u8>)> {
        let mut pdus = Vec::new();

        let mut raw: Vec<u8> = Vec::new();

        let mut kept = Vec::new();

        for pdu in core::mem::take(&mut self.received) {
            match pdu.llid {
                Llid::Control => {
                    kept.push(pdu);

                    continue;
                }
                Llid::DataStart => raw = pdu.payload,
                Llid::DataCont => raw.extend_from_slice(&pdu.payload),
            }

            if raw.len() >= 4 {
                let len = usize::from(u16::from_le_bytes([raw[0], raw[1]]));

                if raw.len() == 4 + len {
                    pdus.push((u16::from_le_bytes([raw[2], raw[3]]), raw[4..].to_vec()));

                    raw.clear();
                }
            }
        }

        if !raw.is_empty() {
            kept.push(DataPdu {
                llid: Llid::DataStart,
                payload: raw,
            });
        }

        self.received = kept;

        pdus
    }
}
