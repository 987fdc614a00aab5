//! Gorm, a BLE peripheral stack
//!
//! Gorm is split into a link layer that runs within interrupt context and a host that runs
//! wherever the application runs. The two halves only share a [`Stack`], the pool of PDU buffers
//! and the RX and TX queues of every connection slot.
//!
//! * [`ll`] is the link layer. It advertises, accepts a connection from a central, and keeps the
//!   connection alive.
//! * [`l2cap`] recombines the LL fragments into L2CAP PDUs and provides the LE credit based
//!   connection-oriented channels.
//! * [`Host`] ties the L2CAP layer of every connection slot to the events of the link layer.
//!
//! ```
//! # use gorm::{ConnHandle, Host, Stack};
//! # use gorm::ll::notify::{EventFlags, EventSink, Event};
//! let stack: &'static Stack = Box::leak(Box::new(Stack::new(32, 1)));
//!
//! let flags = EventFlags::new(1);
//!
//! let mut host = Host::new(stack);
//!
//! host.l2cap_mut(ConnHandle::new(0))
//!     .unwrap()
//!     .accept(0x0080, 100, |event| println!("{:?}", event))
//!     .unwrap();
//!
//! // this is done by the link layer
//! flags.notify(ConnHandle::new(0), Event::Data);
//!
//! assert_eq!(1, host.poll(&flags));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

#[cfg(all(feature = "ll", feature = "l2cap"))]
mod host;

#[cfg(all(feature = "ll", feature = "l2cap"))]
pub use host::Host;

pub use gorm_core::{buffer, ConnHandle, Error, Link, Stack};

#[cfg(feature = "ll")]
#[doc(inline)]
pub use gorm_ll as ll;

#[cfg(feature = "l2cap")]
#[doc(inline)]
pub use gorm_l2cap as l2cap;
