//! LE Signalling Channel packets
//!
//! Signals are sent over the LE signalling channel (CID `0x0005`). Every signal starts with a
//! four byte header of the code, an identifier (never zero), and the length of the data that
//! follows.
//!
//! Only the signals needed for LE credit based connection-oriented channels are implemented. Any
//! other valid signal is decoded as [`Signal::Unhandled`] and any unknown code is decoded as
//! [`Signal::Unknown`] so that it can be rejected.

use core::fmt::{self, Display, Formatter};
use core::num::NonZeroU8;
use gorm_core::buffer::TryExtend;

macro_rules! max_u16 {
    ($( #[ $doc:meta ] )* $name:ident, $max:literal, $min:literal) => {
        $( # [ $doc ] )*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name {
            val: u16,
        }

        impl $name {
            #[doc = "Try to create a new `"]
            #[doc = stringify!($name)]
            #[doc = "`\n\n"]
            #[doc = "# Error\n"]
            #[doc = "An error is returned if `val` is greater than "]
            #[doc = stringify!($max)]
            #[doc = " or less than "]
            #[doc = stringify!($min)]
            #[doc = "."]
            pub fn try_new(val: u16) -> Result<Self, BoundsError> {
                #[allow(unused_comparisons)]
                if val > $max {
                    Err(BoundsError::TooLarge(stringify!($name), stringify!($max)))
                } else if val < $min {
                    Err(BoundsError::TooSmall(stringify!($name), stringify!($min)))
                } else {
                    Ok($name { val })
                }
            }

            /// Get the value
            pub fn get(&self) -> u16 {
                self.val
            }
        }

        impl core::ops::Deref for $name {
            type Target = u16;

            fn deref(&self) -> &Self::Target {
                &self.val
            }
        }
    };
}

max_u16!(
    /// Credit based connection maximum PDU payload size
    LeCreditMps,
    65533,
    23
);

max_u16!(
    /// Credit based connection maximum transmission size
    LeCreditMtu,
    65535,
    23
);

/// Error for a value out of the bounds of its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    TooLarge(&'static str, &'static str),
    TooSmall(&'static str, &'static str),
}

impl Display for BoundsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BoundsError::TooLarge(name, max) => write!(f, "value is larger than the maximum {} of {}", max, name),
            BoundsError::TooSmall(name, min) => write!(f, "value is smaller than the minimum {} of {}", min, name),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BoundsError {}

/// Error for converting raw bytes into a [`Signal`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalError {
    InvalidSize,
    InvalidIdentifier,
    InvalidLengthField,
    InvalidCommandRejectReason(u16),
}

impl Display for SignalError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::InvalidSize => f.write_str("invalid signal size"),
            Self::InvalidIdentifier => f.write_str("the identifier field cannot be zero"),
            Self::InvalidLengthField => f.write_str("length field does not match data length"),
            Self::InvalidCommandRejectReason(reason) => write!(f, "invalid command reject reason {:#x}", reason),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SignalError {}

/// Codes for each Signal Type
///
/// Only the codes valid on the LE signalling channel are listed.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum SignalCode {
    CommandRejectResponse,
    DisconnectionRequest,
    DisconnectionResponse,
    ConnectionParameterUpdateRequest,
    ConnectionParameterUpdateResponse,
    LeCreditBasedConnectionRequest,
    LeCreditBasedConnectionResponse,
    FlowControlCreditIndication,
    CreditBasedConnectionRequest,
    CreditBasedConnectionResponse,
    CreditBasedReconfigureRequest,
    CreditBasedReconfigureResponse,
}

impl SignalCode {
    pub fn into_code(self) -> u8 {
        match self {
            SignalCode::CommandRejectResponse => 0x1,
            SignalCode::DisconnectionRequest => 0x6,
            SignalCode::DisconnectionResponse => 0x7,
            SignalCode::ConnectionParameterUpdateRequest => 0x12,
            SignalCode::ConnectionParameterUpdateResponse => 0x13,
            SignalCode::LeCreditBasedConnectionRequest => 0x14,
            SignalCode::LeCreditBasedConnectionResponse => 0x15,
            SignalCode::FlowControlCreditIndication => 0x16,
            SignalCode::CreditBasedConnectionRequest => 0x17,
            SignalCode::CreditBasedConnectionResponse => 0x18,
            SignalCode::CreditBasedReconfigureRequest => 0x19,
            SignalCode::CreditBasedReconfigureResponse => 0x1a,
        }
    }

    pub fn try_from_code(code: u8) -> Option<Self> {
        match code {
            0x1 => Some(SignalCode::CommandRejectResponse),
            0x6 => Some(SignalCode::DisconnectionRequest),
            0x7 => Some(SignalCode::DisconnectionResponse),
            0x12 => Some(SignalCode::ConnectionParameterUpdateRequest),
            0x13 => Some(SignalCode::ConnectionParameterUpdateResponse),
            0x14 => Some(SignalCode::LeCreditBasedConnectionRequest),
            0x15 => Some(SignalCode::LeCreditBasedConnectionResponse),
            0x16 => Some(SignalCode::FlowControlCreditIndication),
            0x17 => Some(SignalCode::CreditBasedConnectionRequest),
            0x18 => Some(SignalCode::CreditBasedConnectionResponse),
            0x19 => Some(SignalCode::CreditBasedReconfigureRequest),
            0x1a => Some(SignalCode::CreditBasedReconfigureResponse),
            _ => None,
        }
    }
}

fn u16_at(data: &[u8], at: usize) -> Result<u16, SignalError> {
    Ok(<u16>::from_le_bytes([
        data.get(at).copied().ok_or(SignalError::InvalidSize)?,
        data.get(at + 1).copied().ok_or(SignalError::InvalidSize)?,
    ]))
}

/// Encoding of a signal into its raw bytes
pub trait EncodeSignal {
    /// Encode the signal (header included) into `into`
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error>;
}

fn encode_signal<T>(into: &mut T, code: SignalCode, identifier: NonZeroU8, data: &[u8]) -> Result<(), T::Error>
where
    T: TryExtend<u8>,
{
    let len = (data.len() as u16).to_le_bytes();

    into.try_extend([code.into_code(), identifier.get(), len[0], len[1]])?;

    into.try_extend(data.iter().copied())
}

/// The reason of a *Command Reject Response*
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejectReason {
    CommandNotUnderstood,
    SignalingMtuExceeded { actual_mtu: u16 },
    InvalidCidInRequest { local_cid: u16, remote_cid: u16 },
}

impl CommandRejectReason {
    pub fn to_val(&self) -> u16 {
        match self {
            CommandRejectReason::CommandNotUnderstood => 0x0,
            CommandRejectReason::SignalingMtuExceeded { .. } => 0x1,
            CommandRejectReason::InvalidCidInRequest { .. } => 0x2,
        }
    }
}

/// Command Reject Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRejectResponse {
    pub identifier: NonZeroU8,
    pub reason: CommandRejectReason,
}

impl CommandRejectResponse {
    pub fn new_command_not_understood(identifier: NonZeroU8) -> Self {
        CommandRejectResponse {
            identifier,
            reason: CommandRejectReason::CommandNotUnderstood,
        }
    }

    fn try_from_data(identifier: NonZeroU8, data: &[u8]) -> Result<Self, SignalError> {
        let reason = match u16_at(data, 0)? {
            0x0 => CommandRejectReason::CommandNotUnderstood,
            0x1 => CommandRejectReason::SignalingMtuExceeded {
                actual_mtu: u16_at(data, 2)?,
            },
            0x2 => CommandRejectReason::InvalidCidInRequest {
                local_cid: u16_at(data, 2)?,
                remote_cid: u16_at(data, 4)?,
            },
            raw => return Err(SignalError::InvalidCommandRejectReason(raw)),
        };

        Ok(CommandRejectResponse { identifier, reason })
    }
}

impl EncodeSignal for CommandRejectResponse {
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error> {
        let mut data = [0u8; 6];

        data[..2].copy_from_slice(&self.reason.to_val().to_le_bytes());

        let len = match self.reason {
            CommandRejectReason::CommandNotUnderstood => 2,
            CommandRejectReason::SignalingMtuExceeded { actual_mtu } => {
                data[2..4].copy_from_slice(&actual_mtu.to_le_bytes());
                4
            }
            CommandRejectReason::InvalidCidInRequest { local_cid, remote_cid } => {
                data[2..4].copy_from_slice(&local_cid.to_le_bytes());
                data[4..6].copy_from_slice(&remote_cid.to_le_bytes());
                6
            }
        };

        encode_signal(into, SignalCode::CommandRejectResponse, self.identifier, &data[..len])
    }
}

/// Disconnection Request
///
/// The channel identifiers are from the perspective of the sender of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionRequest {
    pub identifier: NonZeroU8,
    pub destination_cid: u16,
    pub source_cid: u16,
}

impl DisconnectionRequest {
    fn try_from_data(identifier: NonZeroU8, data: &[u8]) -> Result<Self, SignalError> {
        Ok(DisconnectionRequest {
            identifier,
            destination_cid: u16_at(data, 0)?,
            source_cid: u16_at(data, 2)?,
        })
    }
}

impl EncodeSignal for DisconnectionRequest {
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error> {
        let [d0, d1] = self.destination_cid.to_le_bytes();
        let [s0, s1] = self.source_cid.to_le_bytes();

        encode_signal(into, SignalCode::DisconnectionRequest, self.identifier, &[d0, d1, s0, s1])
    }
}

/// Disconnection Response
///
/// The channel identifiers are copied from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionResponse {
    pub identifier: NonZeroU8,
    pub destination_cid: u16,
    pub source_cid: u16,
}

impl DisconnectionResponse {
    fn try_from_data(identifier: NonZeroU8, data: &[u8]) -> Result<Self, SignalError> {
        Ok(DisconnectionResponse {
            identifier,
            destination_cid: u16_at(data, 0)?,
            source_cid: u16_at(data, 2)?,
        })
    }
}

impl EncodeSignal for DisconnectionResponse {
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error> {
        let [d0, d1] = self.destination_cid.to_le_bytes();
        let [s0, s1] = self.source_cid.to_le_bytes();

        encode_signal(into, SignalCode::DisconnectionResponse, self.identifier, &[d0, d1, s0, s1])
    }
}

/// LE credit based connection request
///
/// The fields are kept as their raw values as an invalid field is answered with a specific
/// result in the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeCreditBasedConnectionRequest {
    pub identifier: NonZeroU8,
    pub spsm: u16,
    pub source_cid: u16,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
}

impl LeCreditBasedConnectionRequest {
    fn try_from_data(identifier: NonZeroU8, data: &[u8]) -> Result<Self, SignalError> {
        if data.len() != 10 {
            return Err(SignalError::InvalidLengthField);
        }

        Ok(LeCreditBasedConnectionRequest {
            identifier,
            spsm: u16_at(data, 0)?,
            source_cid: u16_at(data, 2)?,
            mtu: u16_at(data, 4)?,
            mps: u16_at(data, 6)?,
            initial_credits: u16_at(data, 8)?,
        })
    }
}

impl EncodeSignal for LeCreditBasedConnectionRequest {
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error> {
        let mut data = [0u8; 10];

        [self.spsm, self.source_cid, self.mtu, self.mps, self.initial_credits]
            .iter()
            .zip(data.chunks_exact_mut(2))
            .for_each(|(field, raw)| raw.copy_from_slice(&field.to_le_bytes()));

        encode_signal(into, SignalCode::LeCreditBasedConnectionRequest, self.identifier, &data)
    }
}

/// The error results of a *LE Credit Based Connection Response*
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeCreditBasedConnectionResponseError {
    SpsmNotSupported,
    NoResourcesAvailable,
    InsufficientAuthentication,
    InsufficientAuthorization,
    EncryptionKeySizeTooShort,
    InsufficientEncryption,
    InvalidSourceCid,
    SourceCidAlreadyAllocated,
    UnacceptableParameters,
    /// A result value that is not defined by the Bluetooth Specification
    Unknown(u16),
}

impl LeCreditBasedConnectionResponseError {
    /// Convert a `LeCreditBasedConnectionResponseError` to its value
    pub fn to_val(&self) -> u16 {
        match self {
            LeCreditBasedConnectionResponseError::SpsmNotSupported => 0x2,
            LeCreditBasedConnectionResponseError::NoResourcesAvailable => 0x4,
            LeCreditBasedConnectionResponseError::InsufficientAuthentication => 0x5,
            LeCreditBasedConnectionResponseError::InsufficientAuthorization => 0x6,
            LeCreditBasedConnectionResponseError::EncryptionKeySizeTooShort => 0x7,
            LeCreditBasedConnectionResponseError::InsufficientEncryption => 0x8,
            LeCreditBasedConnectionResponseError::InvalidSourceCid => 0x9,
            LeCreditBasedConnectionResponseError::SourceCidAlreadyAllocated => 0xa,
            LeCreditBasedConnectionResponseError::UnacceptableParameters => 0xb,
            LeCreditBasedConnectionResponseError::Unknown(v) => *v,
        }
    }

    /// Convert a result value into a `Result`
    ///
    /// Zero is *connection successful*.
    pub fn from_val(value: u16) -> Result<(), Self> {
        match value {
            0 => Ok(()),
            0x2 => Err(LeCreditBasedConnectionResponseError::SpsmNotSupported),
            0x4 => Err(LeCreditBasedConnectionResponseError::NoResourcesAvailable),
            0x5 => Err(LeCreditBasedConnectionResponseError::InsufficientAuthentication),
            0x6 => Err(LeCreditBasedConnectionResponseError::InsufficientAuthorization),
            0x7 => Err(LeCreditBasedConnectionResponseError::EncryptionKeySizeTooShort),
            0x8 => Err(LeCreditBasedConnectionResponseError::InsufficientEncryption),
            0x9 => Err(LeCreditBasedConnectionResponseError::InvalidSourceCid),
            0xa => Err(LeCreditBasedConnectionResponseError::SourceCidAlreadyAllocated),
            0xb => Err(LeCreditBasedConnectionResponseError::UnacceptableParameters),
            v => Err(LeCreditBasedConnectionResponseError::Unknown(v)),
        }
    }
}

impl Display for LeCreditBasedConnectionResponseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpsmNotSupported => f.write_str("SPSM not supported"),
            Self::NoResourcesAvailable => f.write_str("no resources available"),
            Self::InsufficientAuthentication => f.write_str("insufficient authentication"),
            Self::InsufficientAuthorization => f.write_str("insufficient authorization"),
            Self::EncryptionKeySizeTooShort => f.write_str("encryption key size too short"),
            Self::InsufficientEncryption => f.write_str("insufficient encryption"),
            Self::InvalidSourceCid => f.write_str("invalid source CID"),
            Self::SourceCidAlreadyAllocated => f.write_str("source CID already allocated"),
            Self::UnacceptableParameters => f.write_str("unacceptable parameters"),
            Self::Unknown(v) => write!(f, "unknown result {:#x}", v),
        }
    }
}

/// LE credit based connection response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeCreditBasedConnectionResponse {
    pub identifier: NonZeroU8,
    pub destination_cid: u16,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
    pub result: Result<(), LeCreditBasedConnectionResponseError>,
}

impl LeCreditBasedConnectionResponse {
    /// Create a new `LeCreditBasedConnectionResponse` for rejecting the request.
    ///
    /// The `identifier` must be the identifier of the request.
    pub fn new_rejected(identifier: NonZeroU8, reason: LeCreditBasedConnectionResponseError) -> Self {
        LeCreditBasedConnectionResponse {
            identifier,
            destination_cid: 0,
            mtu: 0,
            mps: 0,
            initial_credits: 0,
            result: Err(reason),
        }
    }

    fn try_from_data(identifier: NonZeroU8, data: &[u8]) -> Result<Self, SignalError> {
        if data.len() != 10 {
            return Err(SignalError::InvalidLengthField);
        }

        Ok(LeCreditBasedConnectionResponse {
            identifier,
            destination_cid: u16_at(data, 0)?,
            mtu: u16_at(data, 2)?,
            mps: u16_at(data, 4)?,
            initial_credits: u16_at(data, 6)?,
            result: LeCreditBasedConnectionResponseError::from_val(u16_at(data, 8)?),
        })
    }
}

impl EncodeSignal for LeCreditBasedConnectionResponse {
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error> {
        let result = match self.result {
            Ok(()) => 0,
            Err(e) => e.to_val(),
        };

        let mut data = [0u8; 10];

        [self.destination_cid, self.mtu, self.mps, self.initial_credits, result]
            .iter()
            .zip(data.chunks_exact_mut(2))
            .for_each(|(field, raw)| raw.copy_from_slice(&field.to_le_bytes()));

        encode_signal(into, SignalCode::LeCreditBasedConnectionResponse, self.identifier, &data)
    }
}

/// Flow Control Credit Indication
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowControlCreditInd {
    pub identifier: NonZeroU8,
    /// The channel identifier of the sender of the indication
    pub cid: u16,
    pub credits: u16,
}

impl FlowControlCreditInd {
    fn try_from_data(identifier: NonZeroU8, data: &[u8]) -> Result<Self, SignalError> {
        Ok(FlowControlCreditInd {
            identifier,
            cid: u16_at(data, 0)?,
            credits: u16_at(data, 2)?,
        })
    }
}

impl EncodeSignal for FlowControlCreditInd {
    fn encode<T: TryExtend<u8>>(&self, into: &mut T) -> Result<(), T::Error> {
        let [c0, c1] = self.cid.to_le_bytes();
        let [n0, n1] = self.credits.to_le_bytes();

        encode_signal(into, SignalCode::FlowControlCreditIndication, self.identifier, &[c0, c1, n0, n1])
    }
}

/// A received signal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    CommandReject(CommandRejectResponse),
    DisconnectionRequest(DisconnectionRequest),
    DisconnectionResponse(DisconnectionResponse),
    LeCreditBasedConnectionRequest(LeCreditBasedConnectionRequest),
    LeCreditBasedConnectionResponse(LeCreditBasedConnectionResponse),
    FlowControlCreditInd(FlowControlCreditInd),
    /// A valid signal that this stack does not act on
    Unhandled(SignalCode, NonZeroU8),
    /// A signal with an unknown code
    Unknown(u8, NonZeroU8),
}

impl Signal {
    /// Try to decode a signal
    ///
    /// `raw` is the information payload of a PDU received on the LE signalling channel. Any bytes
    /// beyond the length field of the signal are ignored.
    pub fn try_from_raw(raw: &[u8]) -> Result<Self, SignalError> {
        let code = raw.first().copied().ok_or(SignalError::InvalidSize)?;

        let raw_identifier = raw.get(1).copied().ok_or(SignalError::InvalidSize)?;

        let identifier = NonZeroU8::new(raw_identifier).ok_or(SignalError::InvalidIdentifier)?;

        let data_len = u16_at(raw, 2)? as usize;

        let data = raw.get(4..4 + data_len).ok_or(SignalError::InvalidLengthField)?;

        let Some(signal_code) = SignalCode::try_from_code(code) else {
            return Ok(Signal::Unknown(code, identifier));
        };

        let signal = match signal_code {
            SignalCode::CommandRejectResponse => {
                Signal::CommandReject(CommandRejectResponse::try_from_data(identifier, data)?)
            }
            SignalCode::DisconnectionRequest => {
                Signal::DisconnectionRequest(DisconnectionRequest::try_from_data(identifier, data)?)
            }
            SignalCode::DisconnectionResponse => {
                Signal::DisconnectionResponse(DisconnectionResponse::try_from_data(identifier, data)?)
            }
            SignalCode::LeCreditBasedConnectionRequest => Signal::LeCreditBasedConnectionRequest(
                LeCreditBasedConnectionRequest::try_from_data(identifier, data)?,
            ),
            SignalCode::LeCreditBasedConnectionResponse => Signal::LeCreditBasedConnectionResponse(
                LeCreditBasedConnectionResponse::try_from_data(identifier, data)?,
            ),
            SignalCode::FlowControlCreditIndication => {
                Signal::FlowControlCreditInd(FlowControlCreditInd::try_from_data(identifier, data)?)
            }
            code => Signal::Unhandled(code, identifier),
        };

        Ok(signal)
    }
}
