//! L2CAP configuration constants

use core::ops::RangeInclusive;

/// The maximum size of an LL data channel payload
///
/// This is the size of every LL fragment of an L2CAP PDU.
pub const LL_FRAGMENT_SIZE: usize = 27;

/// The size of the basic L2CAP header
pub const HEADER_SIZE: usize = 4;

/// The size of the SDU length field of the first K-frame of an SDU
pub const SDU_LEN_SIZE: usize = 2;

/// The MTU of the fixed channels (ATT and LE signalling)
pub const FIXED_MTU: usize = 23;

/// The local MTU of a connection-oriented channel
pub const COC_MTU: u16 = 256;

/// The credits given to the peer when a connection-oriented channel is established
pub const COC_INITIAL_CREDITS: u16 = 10;

/// The minimum MPS (and MTU) of an LE credit based connection
pub const MIN_MPS: u16 = 23;

/// The dynamically allocated channel identifiers of an LE-U link
pub const DYN_CID_RANGE: RangeInclusive<u16> = 0x0040..=0x007F;
