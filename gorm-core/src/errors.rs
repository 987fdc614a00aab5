//! Bluetooth Error Codes
//!
//! The link layer uses the error codes of volume one part F of the Bluetooth Core Specification
//! as the reason of a termination (`LL_TERMINATE_IND`). Only the codes this stack sends, or acts
//! upon, have their own variant. Any other code received from a peer is kept as
//! [`Error::Unknown`].

use core::fmt::{self, Display, Formatter};

macro_rules! error_codes {
    ( $( $(#[$doc:meta])* $name:ident = $code:literal, $text:literal; )* ) => {
        /// A Controller Error
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Error {
            /// A code without its own variant
            Unknown(u8),
            $( $(#[$doc])* $name, )*
        }

        impl Error {
            /// Get the raw error code
            pub fn code(self) -> u8 {
                match self {
                    Error::Unknown(code) => code,
                    $( Error::$name => $code, )*
                }
            }

            fn description(&self) -> Option<&'static str> {
                match self {
                    Error::Unknown(_) => None,
                    $( Error::$name => Some($text), )*
                }
            }
        }

        impl From<u8> for Error {
            fn from(raw: u8) -> Self {
                match raw {
                    $( $code => Error::$name, )*
                    _ => Error::Unknown(raw),
                }
            }
        }
    };
}

error_codes! {
    /// The supervision timeout expired
    ConnectionTimeout = 0x08, "connection timeout";
    /// The peer user ended the connection
    RemoteUserTerminatedConnection = 0x13, "remote user terminated connection";
    ConnectionTerminatedByLocalHost = 0x16, "connection terminated by local host";
    /// The parameters of a control procedure cannot be used
    InvalidLlParameters = 0x1e, "invalid LL parameters";
    UnspecifiedError = 0x1f, "unspecified error";
    /// The instant of a control procedure already passed
    InstantPassed = 0x28, "instant passed";
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "controller error: {} ({:#04x})", text, self.code()),
            None => write!(f, "controller error: unknown error code {:#04x}", self.code()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<Error> for u8 {
    fn from(error: Error) -> Self {
        error.code()
    }
}
