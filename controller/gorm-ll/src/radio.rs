//! Radio Abstraction
//!
//! The link layer drives the radio through a [`RadioDriver`]. A driver only needs to know how to
//! send a single packet, listen for a single packet, and hand the received packet to the link
//! layer. The completion of every operation is signalled to the link layer by calling
//! [`LinkLayer::on_radio_event`](crate::LinkLayer::on_radio_event) from the radio interrupt.
//!
//! The [`Transceiver`] sits between the link layer and the driver. It makes sure that only one
//! operation is outstanding at a time and remembers what the link layer wants done when that
//! operation completes.

use core::fmt::{Debug, Display, Formatter};
use gorm_core::buffer::Buffer;
use gorm_core::ConnHandle;

/// The parameters the radio is programmed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioContext {
    pub access_address: u32,
    /// This is a 24 bit value
    pub crc_init: u32,
    pub channel: u8,
}

/// Information about a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxInfo {
    /// The CRC of the packet was valid
    pub crc_ok: bool,
    pub rssi: i8,
}

/// The event signalled by the radio interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    /// A packet was sent
    TxComplete,
    /// A packet was received
    RxComplete,
}

/// A radio device
pub trait RadioDriver {
    type Error: Debug + Display;

    /// Program the access address, CRC initialization value, and channel
    fn set_context(&mut self, context: &RadioContext) -> Result<(), Self::Error>;

    /// Send a packet on the current context
    ///
    /// [`RadioEvent::TxComplete`] must be signalled once the packet is sent.
    fn send(&mut self, header: [u8; 2], payload: &[u8]) -> Result<(), Self::Error>;

    /// Listen for a packet on the current context
    ///
    /// [`RadioEvent::RxComplete`] must be signalled once a packet was received.
    fn listen(&mut self) -> Result<(), Self::Error>;

    /// Copy the last received packet into `buffer`
    ///
    /// The first header octet is written to `flags`, the payload is written to the payload area
    /// and the length is set to the length field of the packet.
    fn recv(&mut self, buffer: &mut Buffer) -> Result<RxInfo, Self::Error>;

    /// Abort the current operation
    ///
    /// No event is signalled for an aborted operation.
    fn stop(&mut self);
}

/// Error returned by a [`Transceiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverError<E> {
    /// Another operation is outstanding
    Busy,
    /// There is no current owner to continue with
    NotBound,
    Driver(E),
}

impl<E: Display> Display for TransceiverError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            TransceiverError::Busy => f.write_str("radio is busy"),
            TransceiverError::NotBound => f.write_str("radio is not bound to an owner"),
            TransceiverError::Driver(e) => write!(f, "radio driver error: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E: Debug + Display> std::error::Error for TransceiverError<E> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Send,
    Receive,
}

impl Operation {
    fn completed_by(self, event: RadioEvent) -> bool {
        matches!(
            (self, event),
            (Operation::Send, RadioEvent::TxComplete) | (Operation::Receive, RadioEvent::RxComplete)
        )
    }
}

/// A completed radio operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion<C> {
    pub owner: ConnHandle,
    pub callback: C,
}

/// The radio multiplexer
///
/// A `Transceiver` is bound to the connection slot that last started an operation, the *owner*.
/// The continuation `C` of an operation is handed back exactly once by
/// [`complete`](Transceiver::complete), and is discarded by [`stop`](Transceiver::stop).
pub struct Transceiver<R, C> {
    driver: R,
    owner: Option<ConnHandle>,
    pending: Option<(Operation, C)>,
}

impl<R, C> Transceiver<R, C>
where
    R: RadioDriver,
    C: Copy,
{
    pub fn new(driver: R) -> Self {
        Transceiver {
            driver,
            owner: None,
            pending: None,
        }
    }

    /// Check if an operation is outstanding
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Check if the transceiver is bound to `owner`
    pub fn is_bound_to(&self, owner: ConnHandle) -> bool {
        self.owner == Some(owner)
    }

    fn start(
        &mut self,
        owner: ConnHandle,
        context: &RadioContext,
        operation: Operation,
        callback: C,
    ) -> Result<(), TransceiverError<R::Error>> {
        if self.is_busy() {
            return Err(TransceiverError::Busy);
        }

        self.driver.set_context(context).map_err(TransceiverError::Driver)?;

        self.owner = Some(owner);

        self.pending = Some((operation, callback));

        Ok(())
    }

    fn abandon<T>(&mut self, result: Result<T, R::Error>) -> Result<T, TransceiverError<R::Error>> {
        result.map_err(|e| {
            self.pending = None;

            TransceiverError::Driver(e)
        })
    }

    /// Send `pdu` for `owner` on `context`
    pub fn send(
        &mut self,
        owner: ConnHandle,
        context: &RadioContext,
        pdu: &Buffer,
        callback: C,
    ) -> Result<(), TransceiverError<R::Error>> {
        self.start(owner, context, Operation::Send, callback)?;

        let result = self.driver.send(pdu.header(), pdu.data());

        self.abandon(result)
    }

    /// Listen for a packet for `owner` on `context`
    pub fn recv(
        &mut self,
        owner: ConnHandle,
        context: &RadioContext,
        callback: C,
    ) -> Result<(), TransceiverError<R::Error>> {
        self.start(owner, context, Operation::Receive, callback)?;

        let result = self.driver.listen();

        self.abandon(result)
    }

    fn continue_with(&mut self, operation: Operation, callback: C) -> Result<(), TransceiverError<R::Error>> {
        if self.is_busy() {
            return Err(TransceiverError::Busy);
        }

        if self.owner.is_none() {
            return Err(TransceiverError::NotBound);
        }

        self.pending = Some((operation, callback));

        Ok(())
    }

    /// Send `pdu` on the context of the last operation
    pub fn send_next(&mut self, pdu: &Buffer, callback: C) -> Result<(), TransceiverError<R::Error>> {
        self.continue_with(Operation::Send, callback)?;

        let result = self.driver.send(pdu.header(), pdu.data());

        self.abandon(result)
    }

    /// Listen on the context of the last operation
    pub fn recv_next(&mut self, callback: C) -> Result<(), TransceiverError<R::Error>> {
        self.continue_with(Operation::Receive, callback)?;

        let result = self.driver.listen();

        self.abandon(result)
    }

    /// Copy the last received packet into `buffer`
    pub fn read(&mut self, buffer: &mut Buffer) -> Result<RxInfo, R::Error> {
        self.driver.recv(buffer)
    }

    /// Abort the outstanding operation and release the owner
    pub fn stop(&mut self) {
        self.driver.stop();

        self.pending = None;

        self.owner = None;
    }

    /// Take the continuation of the operation completed by `event`
    ///
    /// `None` is returned if there is no outstanding operation or if `event` does not complete it.
    pub fn complete(&mut self, event: RadioEvent) -> Option<Completion<C>> {
        match self.pending {
            Some((operation, callback)) if operation.completed_by(event) => {
                self.pending = None;

                let owner = self.owner?;

                Some(Completion { owner, callback })
            }
            _ => {
                log::trace!("(RADIO) spurious radio event {:?}", event);

                None
            }
        }
    }

    pub fn driver(&self) -> &R {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut R {
        &mut self.driver
    }
}
