//! Core of `gorm`
//!
//! This contains the types shared by the link layer, which runs in interrupt context, and the
//! host protocols, which run in a thread.
//!
//! The only state shared between the two is the [`Stack`]. It contains the [`BufferPool`] and a
//! [`Link`] for every connection slot. A `Link` is nothing more than the two queues of a
//! connection: the link layer pushes received data PDUs to the RX queue and pops the PDUs to send
//! from the TX queue, the host does the opposite. Moving a buffer through a queue is the only
//! synchronization between the interrupt and the host.
//!
//! Connection slots are referred to by a [`ConnHandle`], an index into the slots of the stack, so
//! no pointers to connection state are ever passed between the two contexts.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod buffer;
pub mod errors;

pub use errors::Error;

use alloc::boxed::Box;
use alloc::vec::Vec;
use buffer::queue::PduQueue;
use buffer::BufferPool;

/// Connection Handle
///
/// This is the index of a connection slot of the [`Stack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnHandle(u8);

impl ConnHandle {
    /// Create a new `ConnHandle`
    pub const fn new(index: u8) -> Self {
        ConnHandle(index)
    }

    /// Get the index of the connection slot
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw value of the handle
    pub fn get_raw(self) -> u8 {
        self.0
    }
}

impl core::fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The queues of a connection slot
#[derive(Debug, Default)]
pub struct Link {
    rx_queue: PduQueue,
    tx_queue: PduQueue,
}

impl Link {
    /// Create a new `Link`
    pub const fn new() -> Self {
        Link {
            rx_queue: PduQueue::new(),
            tx_queue: PduQueue::new(),
        }
    }

    /// Get the queue of data PDUs received by the link layer
    pub fn rx_queue(&self) -> &PduQueue {
        &self.rx_queue
    }

    /// Get the queue of data PDUs to be sent by the link layer
    pub fn tx_queue(&self) -> &PduQueue {
        &self.tx_queue
    }

    /// Return the buffers of both queues to the pool
    pub fn clear(&self, pool: &BufferPool) {
        self.rx_queue.clear(pool);
        self.tx_queue.clear(pool);
    }
}

/// State shared between the link layer and the host
///
/// A `Stack` is usually put into a `static` (or leaked) so that it can be referenced from both
/// the radio interrupt and the host thread.
#[derive(Debug)]
pub struct Stack {
    pool: BufferPool,
    links: Box<[Link]>,
}

impl Stack {
    /// The maximum number of connection slots
    pub const MAX_CONNECTIONS: usize = u8::MAX as usize;

    /// Create a new `Stack`
    ///
    /// This creates the pool with `buffers` number of buffers and `connections` number of
    /// connection slots.
    ///
    /// # Panic
    /// `connections` cannot be larger than [`MAX_CONNECTIONS`](Stack::MAX_CONNECTIONS) and
    /// `buffers` cannot be larger than [`BufferPool::MAX_BUFFERS`].
    pub fn new(buffers: usize, connections: usize) -> Self {
        assert!(connections <= Self::MAX_CONNECTIONS, "too many connection slots");

        let pool = BufferPool::new(buffers);

        let links = (0..connections).map(|_| Link::new()).collect::<Vec<_>>().into_boxed_slice();

        Stack { pool, links }
    }

    /// Get the buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Get the link of a connection slot
    pub fn link(&self, handle: ConnHandle) -> Option<&Link> {
        self.links.get(handle.index())
    }

    /// Get the number of connection slots
    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    /// Iterate over the handles of every connection slot
    pub fn handles(&self) -> impl Iterator<Item = ConnHandle> {
        (0..self.links.len() as u8).map(ConnHandle::new)
    }
}
