//! Link Layer PDUs
//!
//! This contains the header fields of advertising channel and data channel PDUs, the payload of a
//! `CONNECT_IND`, and the control PDUs the peripheral acts on.

use crate::channel::ChannelMap;
use crate::config;
use core::fmt::{Display, Formatter};

/// Advertising channel PDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvPduType {
    AdvInd,
    AdvDirectInd,
    AdvNonconnInd,
    ScanReq,
    ScanRsp,
    ConnectInd,
    AdvScanInd,
}

impl AdvPduType {
    pub fn into_raw(self) -> u8 {
        match self {
            AdvPduType::AdvInd => 0x0,
            AdvPduType::AdvDirectInd => 0x1,
            AdvPduType::AdvNonconnInd => 0x2,
            AdvPduType::ScanReq => 0x3,
            AdvPduType::ScanRsp => 0x4,
            AdvPduType::ConnectInd => 0x5,
            AdvPduType::AdvScanInd => 0x6,
        }
    }

    pub fn try_from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x0 => Some(AdvPduType::AdvInd),
            0x1 => Some(AdvPduType::AdvDirectInd),
            0x2 => Some(AdvPduType::AdvNonconnInd),
            0x3 => Some(AdvPduType::ScanReq),
            0x4 => Some(AdvPduType::ScanRsp),
            0x5 => Some(AdvPduType::ConnectInd),
            0x6 => Some(AdvPduType::AdvScanInd),
            _ => None,
        }
    }
}

/// The first header octet of an advertising channel PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvHeader(pub u8);

impl AdvHeader {
    const TYPE_MASK: u8 = 0x0F;
    const CH_SEL: u8 = 1 << 5;
    const TX_ADD: u8 = 1 << 6;
    const RX_ADD: u8 = 1 << 7;

    /// Create a header for a PDU sent by this device
    pub fn new(pdu_type: AdvPduType, random_address: bool) -> Self {
        let tx_add = if random_address { Self::TX_ADD } else { 0 };

        AdvHeader(pdu_type.into_raw() | tx_add)
    }

    pub fn pdu_type(self) -> Option<AdvPduType> {
        AdvPduType::try_from_raw(self.0 & Self::TYPE_MASK)
    }

    /// Check if the sender supports channel selection algorithm #2
    pub fn ch_sel(self) -> bool {
        self.0 & Self::CH_SEL != 0
    }

    pub fn tx_add(self) -> bool {
        self.0 & Self::TX_ADD != 0
    }

    pub fn rx_add(self) -> bool {
        self.0 & Self::RX_ADD != 0
    }
}

pub use gorm_core::buffer::Llid;

/// The first header octet of a data channel PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader(pub u8);

impl DataHeader {
    const NESN: u8 = 1 << 2;
    const SN: u8 = 1 << 3;
    const MD: u8 = 1 << 4;

    pub fn new(llid: Llid) -> Self {
        DataHeader(llid.into_raw())
    }

    pub fn llid(self) -> Option<Llid> {
        Llid::try_from_raw(self.0)
    }

    pub fn nesn(self) -> bool {
        self.0 & Self::NESN != 0
    }

    pub fn sn(self) -> bool {
        self.0 & Self::SN != 0
    }

    pub fn md(self) -> bool {
        self.0 & Self::MD != 0
    }

    /// Replace the sequence numbers and the more data bit
    ///
    /// The LLID bits are kept.
    pub fn with_sequence(self, sn: bool, nesn: bool, md: bool) -> Self {
        let mut raw = self.0 & Llid::MASK;

        if nesn {
            raw |= Self::NESN
        }

        if sn {
            raw |= Self::SN
        }

        if md {
            raw |= Self::MD
        }

        DataHeader(raw)
    }
}

/// Error for an invalid `CONNECT_IND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectIndError {
    InvalidLength(usize),
    InvalidHopIncrement(u8),
    UnsupportedChannelSelection,
    TooFewChannels,
    InvalidInterval(u16),
    InvalidLatency(u16),
    InvalidTimeout(u16),
    InvalidWindow,
}

impl Display for ConnectIndError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ConnectIndError::InvalidLength(len) => write!(f, "invalid CONNECT_IND length ({})", len),
            ConnectIndError::InvalidHopIncrement(hop) => write!(f, "invalid hop increment ({})", hop),
            ConnectIndError::UnsupportedChannelSelection => {
                f.write_str("channel selection algorithm #2 is not supported")
            }
            ConnectIndError::TooFewChannels => f.write_str("fewer than two data channels are used"),
            ConnectIndError::InvalidInterval(raw) => write!(f, "invalid connection interval ({})", raw),
            ConnectIndError::InvalidLatency(raw) => write!(f, "invalid peripheral latency ({})", raw),
            ConnectIndError::InvalidTimeout(raw) => write!(f, "invalid supervision timeout ({})", raw),
            ConnectIndError::InvalidWindow => f.write_str("invalid transmit window"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConnectIndError {}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// The `LLData` of a `CONNECT_IND`
///
/// Raw field values are kept in their over the air units, the `*_us` methods convert them into
/// microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectInd {
    pub init_address: [u8; 6],
    pub adv_address: [u8; 6],
    pub access_address: u32,
    pub crc_init: u32,
    pub win_size: u8,
    pub win_offset: u16,
    pub interval: u16,
    pub latency: u16,
    pub timeout: u16,
    pub channel_map: ChannelMap,
    pub hop: u8,
    pub sca: u8,
}

impl ConnectInd {
    /// The size of the payload of a `CONNECT_IND`
    pub const LEN: usize = 34;

    /// Parse and validate a `CONNECT_IND`
    ///
    /// `header` is the first header octet of the advertising channel PDU and `payload` is the
    /// complete payload (including the initiator and advertiser addresses).
    pub fn try_from_pdu(header: AdvHeader, payload: &[u8]) -> Result<Self, ConnectIndError> {
        if payload.len() != Self::LEN {
            return Err(ConnectIndError::InvalidLength(payload.len()));
        }

        if header.ch_sel() {
            return Err(ConnectIndError::UnsupportedChannelSelection);
        }

        let mut init_address = [0u8; 6];
        let mut adv_address = [0u8; 6];

        init_address.copy_from_slice(&payload[0..6]);
        adv_address.copy_from_slice(&payload[6..12]);

        let access_address = u32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]);

        let crc_init = u32::from_le_bytes([payload[16], payload[17], payload[18], 0]);

        let mut channel_map = [0u8; 5];

        channel_map.copy_from_slice(&payload[28..33]);

        let connect_ind = ConnectInd {
            init_address,
            adv_address,
            access_address,
            crc_init,
            win_size: payload[19],
            win_offset: u16_at(payload, 20),
            interval: u16_at(payload, 22),
            latency: u16_at(payload, 24),
            timeout: u16_at(payload, 26),
            channel_map: ChannelMap::new(channel_map),
            hop: payload[33] & 0x1F,
            sca: payload[33] >> 5,
        };

        connect_ind.validate()?;

        Ok(connect_ind)
    }

    fn validate(&self) -> Result<(), ConnectIndError> {
        if !(5..=16).contains(&self.hop) {
            return Err(ConnectIndError::InvalidHopIncrement(self.hop));
        }

        if self.channel_map.count() < 2 {
            return Err(ConnectIndError::TooFewChannels);
        }

        validate_timing(self.interval, self.latency, self.timeout)?;

        validate_window(self.win_size, self.win_offset, self.interval)
    }

    /// Get the connection interval in microseconds
    pub fn interval_us(&self) -> u32 {
        self.interval as u32 * config::UNIT_1_25_MS
    }

    /// Get the supervision timeout in microseconds
    pub fn timeout_us(&self) -> u32 {
        self.timeout as u32 * config::UNIT_10_MS
    }

    /// Get the transmit window offset in microseconds
    pub fn win_offset_us(&self) -> u32 {
        self.win_offset as u32 * config::UNIT_1_25_MS
    }

    /// Get the transmit window size in microseconds
    pub fn win_size_us(&self) -> u32 {
        self.win_size as u32 * config::UNIT_1_25_MS
    }
}

/// Validate the interval, latency, and timeout of a connection
///
/// The supervision timeout must be larger than the time of `(1 + latency)` connection intervals
/// times two.
fn validate_timing(interval: u16, latency: u16, timeout: u16) -> Result<(), ConnectIndError> {
    let interval_us = interval as u32 * config::UNIT_1_25_MS;

    let timeout_us = timeout as u32 * config::UNIT_10_MS;

    if !(config::CONN_INTERVAL_MIN..=config::CONN_INTERVAL_MAX).contains(&interval_us) {
        return Err(ConnectIndError::InvalidInterval(interval));
    }

    if latency > config::CONN_LATENCY_MAX {
        return Err(ConnectIndError::InvalidLatency(latency));
    }

    let minimum = (1 + latency as u64) * interval_us as u64 * 2;

    if !(config::SUPERVISION_TIMEOUT_MIN..=config::SUPERVISION_TIMEOUT_MAX).contains(&timeout_us)
        || timeout_us as u64 <= minimum
    {
        return Err(ConnectIndError::InvalidTimeout(timeout));
    }

    Ok(())
}

/// Validate the transmit window against the connection interval
fn validate_window(win_size: u8, win_offset: u16, interval: u16) -> Result<(), ConnectIndError> {
    if !(1..=8).contains(&win_size) || win_offset > interval {
        return Err(ConnectIndError::InvalidWindow);
    }

    Ok(())
}

/// LL control PDU opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOpcode {
    ConnectionUpdateInd,
    ChannelMapInd,
    TerminateInd,
    EncReq,
    EncRsp,
    StartEncReq,
    StartEncRsp,
    UnknownRsp,
    FeatureReq,
    FeatureRsp,
    PauseEncReq,
    PauseEncRsp,
    VersionInd,
    RejectInd,
    SlaveFeatureReq,
    ConnectionParamReq,
    ConnectionParamRsp,
    RejectIndExt,
    PingReq,
    PingRsp,
    LengthReq,
    LengthRsp,
    PhyReq,
    PhyRsp,
    PhyUpdateInd,
    MinUsedChannelsInd,
}

impl ControlOpcode {
    pub fn into_raw(self) -> u8 {
        match self {
            ControlOpcode::ConnectionUpdateInd => 0x00,
            ControlOpcode::ChannelMapInd => 0x01,
            ControlOpcode::TerminateInd => 0x02,
            ControlOpcode::EncReq => 0x03,
            ControlOpcode::EncRsp => 0x04,
            ControlOpcode::StartEncReq => 0x05,
            ControlOpcode::StartEncRsp => 0x06,
            ControlOpcode::UnknownRsp => 0x07,
            ControlOpcode::FeatureReq => 0x08,
            ControlOpcode::FeatureRsp => 0x09,
            ControlOpcode::PauseEncReq => 0x0A,
            ControlOpcode::PauseEncRsp => 0x0B,
            ControlOpcode::VersionInd => 0x0C,
            ControlOpcode::RejectInd => 0x0D,
            ControlOpcode::SlaveFeatureReq => 0x0E,
            ControlOpcode::ConnectionParamReq => 0x0F,
            ControlOpcode::ConnectionParamRsp => 0x10,
            ControlOpcode::RejectIndExt => 0x11,
            ControlOpcode::PingReq => 0x12,
            ControlOpcode::PingRsp => 0x13,
            ControlOpcode::LengthReq => 0x14,
            ControlOpcode::LengthRsp => 0x15,
            ControlOpcode::PhyReq => 0x16,
            ControlOpcode::PhyRsp => 0x17,
            ControlOpcode::PhyUpdateInd => 0x18,
            ControlOpcode::MinUsedChannelsInd => 0x19,
        }
    }

    pub fn try_from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(ControlOpcode::ConnectionUpdateInd),
            0x01 => Some(ControlOpcode::ChannelMapInd),
            0x02 => Some(ControlOpcode::TerminateInd),
            0x03 => Some(ControlOpcode::EncReq),
            0x04 => Some(ControlOpcode::EncRsp),
            0x05 => Some(ControlOpcode::StartEncReq),
            0x06 => Some(ControlOpcode::StartEncRsp),
            0x07 => Some(ControlOpcode::UnknownRsp),
            0x08 => Some(ControlOpcode::FeatureReq),
            0x09 => Some(ControlOpcode::FeatureRsp),
            0x0A => Some(ControlOpcode::PauseEncReq),
            0x0B => Some(ControlOpcode::PauseEncRsp),
            0x0C => Some(ControlOpcode::VersionInd),
            0x0D => Some(ControlOpcode::RejectInd),
            0x0E => Some(ControlOpcode::SlaveFeatureReq),
            0x0F => Some(ControlOpcode::ConnectionParamReq),
            0x10 => Some(ControlOpcode::ConnectionParamRsp),
            0x11 => Some(ControlOpcode::RejectIndExt),
            0x12 => Some(ControlOpcode::PingReq),
            0x13 => Some(ControlOpcode::PingRsp),
            0x14 => Some(ControlOpcode::LengthReq),
            0x15 => Some(ControlOpcode::LengthRsp),
            0x16 => Some(ControlOpcode::PhyReq),
            0x17 => Some(ControlOpcode::PhyRsp),
            0x18 => Some(ControlOpcode::PhyUpdateInd),
            0x19 => Some(ControlOpcode::MinUsedChannelsInd),
            _ => None,
        }
    }
}

/// The `CtrData` of an `LL_CONNECTION_UPDATE_IND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub win_size: u8,
    pub win_offset: u16,
    pub interval: u16,
    pub latency: u16,
    pub timeout: u16,
    pub instant: u16,
}

impl ConnectionUpdate {
    pub const LEN: usize = 11;

    /// Parse the control data (the bytes after the opcode)
    ///
    /// The timing values are not validated here, see [`validate`](ConnectionUpdate::validate).
    pub fn try_from_ctr_data(data: &[u8]) -> Option<Self> {
        (data.len() == Self::LEN).then(|| ConnectionUpdate {
            win_size: data[0],
            win_offset: u16_at(data, 1),
            interval: u16_at(data, 3),
            latency: u16_at(data, 5),
            timeout: u16_at(data, 7),
            instant: u16_at(data, 9),
        })
    }

    /// Check the new connection parameters with the same rules as a `CONNECT_IND`
    pub fn validate(&self) -> Result<(), ConnectIndError> {
        validate_timing(self.interval, self.latency, self.timeout)?;

        validate_window(self.win_size, self.win_offset, self.interval)
    }

    /// Get the over the air control data
    pub fn to_ctr_data(&self) -> [u8; Self::LEN] {
        let mut data = [0u8; Self::LEN];

        data[0] = self.win_size;
        data[1..3].copy_from_slice(&self.win_offset.to_le_bytes());
        data[3..5].copy_from_slice(&self.interval.to_le_bytes());
        data[5..7].copy_from_slice(&self.latency.to_le_bytes());
        data[7..9].copy_from_slice(&self.timeout.to_le_bytes());
        data[9..11].copy_from_slice(&self.instant.to_le_bytes());

        data
    }
}

/// The `CtrData` of an `LL_CHANNEL_MAP_IND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMapUpdate {
    pub channel_map: ChannelMap,
    pub instant: u16,
}

impl ChannelMapUpdate {
    pub const LEN: usize = 7;

    pub fn try_from_ctr_data(data: &[u8]) -> Option<Self> {
        if data.len() != Self::LEN {
            return None;
        }

        let mut raw = [0u8; 5];

        raw.copy_from_slice(&data[..5]);

        Some(ChannelMapUpdate {
            channel_map: ChannelMap::new(raw),
            instant: u16_at(data, 5),
        })
    }

    pub fn to_ctr_data(&self) -> [u8; Self::LEN] {
        let mut data = [0u8; Self::LEN];

        data[..5].copy_from_slice(&self.channel_map.to_raw());
        data[5..].copy_from_slice(&self.instant.to_le_bytes());

        data
    }
}

/// Check if an instant is in the past
///
/// The event counter wraps, so an instant is in the past when it is 32767 or more events
/// "before" the current event counter.
pub fn instant_passed(instant: u16, event_counter: u16) -> bool {
    instant.wrapping_sub(event_counter) >= 32767
}
