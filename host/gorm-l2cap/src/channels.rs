//! LE-U Channel Identifiers
//!
//! Channel identifiers are used by L2CAP to associate the data of a PDU with a channel. On an LE-U
//! logical link there are three fixed channels used by this stack and a range of channel
//! identifiers that are dynamically allocated to connection-oriented channels.

use crate::config;

/// LE-U Channel Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LeCid {
    /// Channel for the Attribute Protocol
    ///
    /// All GATT data is sent through this channel.
    AttributeProtocol,
    /// LE Signaling Channel
    LeSignalingChannel,
    /// Security Manager Protocol
    SecurityManagerProtocol,
    /// A channel identifier allocated for a connection-oriented channel
    DynamicallyAllocated(DynChannelId),
}

impl LeCid {
    pub fn to_cid(&self) -> u16 {
        match self {
            LeCid::AttributeProtocol => 0x4,
            LeCid::LeSignalingChannel => 0x5,
            LeCid::SecurityManagerProtocol => 0x6,
            LeCid::DynamicallyAllocated(dyn_id) => dyn_id.get_val(),
        }
    }

    pub fn try_from_raw(val: u16) -> Option<Self> {
        match val {
            0x4 => Some(LeCid::AttributeProtocol),
            0x5 => Some(LeCid::LeSignalingChannel),
            0x6 => Some(LeCid::SecurityManagerProtocol),
            _ => DynChannelId::try_new(val).map(LeCid::DynamicallyAllocated),
        }
    }
}

impl core::fmt::Display for LeCid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            LeCid::AttributeProtocol => f.write_str("attribute protocol"),
            LeCid::LeSignalingChannel => f.write_str("LE L2CAP signaling channel"),
            LeCid::SecurityManagerProtocol => f.write_str("security manager protocol"),
            LeCid::DynamicallyAllocated(id) => write!(f, "dynamically allocated channel ({})", id),
        }
    }
}

impl From<DynChannelId> for LeCid {
    fn from(id: DynChannelId) -> Self {
        LeCid::DynamicallyAllocated(id)
    }
}

/// Dynamically allocated channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DynChannelId(u16);

impl DynChannelId {
    /// Try to create a `DynChannelId`
    ///
    /// `None` is returned if `val` is not within [`DYN_CID_RANGE`](config::DYN_CID_RANGE).
    pub fn try_new(val: u16) -> Option<Self> {
        config::DYN_CID_RANGE.contains(&val).then_some(DynChannelId(val))
    }

    /// Allocate the lowest channel identifier that is not in use
    ///
    /// Input `in_use` is called to check if a channel identifier is already taken.
    pub fn allocate<F>(mut in_use: F) -> Option<Self>
    where
        F: FnMut(DynChannelId) -> bool,
    {
        config::DYN_CID_RANGE.map(DynChannelId).find(|id| !in_use(*id))
    }

    /// Get the value of the dynamic channel identifier
    pub fn get_val(&self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for DynChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
