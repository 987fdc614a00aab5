//! Compile time configuration of the link layer
//!
//! All times are in microseconds.

/// The advertising channels, in the order they are visited within an advertising event
pub const ADV_CHANNELS: [u8; 3] = [37, 38, 39];

/// The access address of every advertising channel PDU
pub const ADV_ACCESS_ADDRESS: u32 = 0x8E89_BED6;

/// The CRC initialization value of every advertising channel PDU
pub const ADV_CRC_INIT: u32 = 0x55_5555;

/// The time spent on each advertising channel
///
/// The `ADV_IND` is sent at the start of the visit and the radio listens for a `SCAN_REQ` or
/// `CONNECT_IND` for the remainder.
pub const ADV_EVENT_DURATION: u32 = 5_000;

/// The upper limit of the random delay added to every advertising interval
pub const ADV_JITTER_MAX: u32 = 10_000;

/// The smallest advertising interval
pub const ADV_INTERVAL_MIN: u32 = 20_000;

/// The largest advertising interval
pub const ADV_INTERVAL_MAX: u32 = 10_240_000;

/// The largest size of the advertising data and of the scan response data
pub const ADV_DATA_MAX: usize = 31;

/// The delay between the end of the `CONNECT_IND` and the start of the transmit window
pub const TRANSMIT_WIN_DELAY: u32 = 1_250;

/// The time between the anchor point and the completion of the first received packet
///
/// This is the air time of an empty data channel PDU on the 1M PHY.
pub const ANCHOR_OFFSET: u32 = 80;

/// The window widening applied to both sides of the receive window
pub const WIN_WIDENING: u32 = 64;

/// The receive window of an anchored connection event, excluding window widening
pub const RX_TIMEOUT: u32 = 250;

/// The time to wait for the next packet of the central within a connection event
pub const IFS_RX_TIMEOUT: u32 = 300;

/// The unit of the connection interval, the window size, and the window offset
pub const UNIT_1_25_MS: u32 = 1_250;

/// The unit of the supervision timeout
pub const UNIT_10_MS: u32 = 10_000;

/// The smallest connection interval
pub const CONN_INTERVAL_MIN: u32 = 7_500;

/// The largest connection interval
pub const CONN_INTERVAL_MAX: u32 = 4_000_000;

/// The largest peripheral latency, in connection events
pub const CONN_LATENCY_MAX: u16 = 499;

/// The smallest supervision timeout
pub const SUPERVISION_TIMEOUT_MIN: u32 = 100_000;

/// The largest supervision timeout
pub const SUPERVISION_TIMEOUT_MAX: u32 = 32_000_000;

/// The largest payload of a data channel PDU
pub const DATA_PAYLOAD_MAX: usize = 27;

/// The version of the Bluetooth Core Specification sent within `LL_VERSION_IND` (5.0)
pub const VERSION_NUMBER: u8 = 0x09;

/// The company identifier sent within `LL_VERSION_IND`
pub const COMPANY_ID: u16 = 0xFFFF;

/// The sub version number sent within `LL_VERSION_IND`
pub const SUB_VERSION: u16 = 0x0001;

/// The feature bit of LE Ping
pub const FEATURE_LE_PING: u64 = 1 << 4;

/// The supported features sent within `LL_FEATURE_RSP`
pub const FEATURES: u64 = if cfg!(feature = "ping") { FEATURE_LE_PING } else { 0 };
