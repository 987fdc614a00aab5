//! PDU Queues
//!
//! A [`PduQueue`] is a singly linked FIFO of buffers. The links are kept within the
//! [`BufferPool`], so a queue itself is only its two ends and a length.

use super::{Buf, BufferPool, Buffer};
use core::cell::Cell;
use critical_section::Mutex;

#[derive(Clone, Copy, Default)]
struct Ends {
    head: Option<u16>,
    tail: Option<u16>,
    len: u16,
}

/// A FIFO of buffers
///
/// Pushing a [`Buf`] transfers the ownership of the buffer to the queue, and popping transfers the
/// ownership to the caller. Both are atomic with respect to interrupts so a queue can be pushed to
/// from an interrupt and popped from a thread (or the other way around).
///
/// # Note
/// A queue must only be used with a single `BufferPool`.
pub struct PduQueue {
    ends: Mutex<Cell<Ends>>,
}

impl PduQueue {
    /// Create a new empty `PduQueue`
    pub const fn new() -> Self {
        PduQueue {
            ends: Mutex::new(Cell::new(Ends {
                head: None,
                tail: None,
                len: 0,
            })),
        }
    }

    /// Get the number of buffers within the queue
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ends.borrow(cs).get().len as usize)
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a buffer to the back of the queue
    pub fn push(&self, pool: &BufferPool, buf: Buf) {
        critical_section::with(|cs| {
            let mut state = pool.state.borrow_ref_mut(cs);

            let mut ends = self.ends.borrow(cs).get();

            let index = buf.index;

            state.next[index as usize] = None;

            match ends.tail {
                Some(tail) => state.next[tail as usize] = Some(index),
                None => ends.head = Some(index),
            }

            ends.tail = Some(index);

            ends.len += 1;

            self.ends.borrow(cs).set(ends);
        })
    }

    /// Push a buffer to the front of the queue
    pub fn push_front(&self, pool: &BufferPool, buf: Buf) {
        critical_section::with(|cs| {
            let mut state = pool.state.borrow_ref_mut(cs);

            let mut ends = self.ends.borrow(cs).get();

            let index = buf.index;

            state.next[index as usize] = ends.head;

            if ends.tail.is_none() {
                ends.tail = Some(index);
            }

            ends.head = Some(index);

            ends.len += 1;

            self.ends.borrow(cs).set(ends);
        })
    }

    /// Pop the buffer at the front of the queue
    pub fn pop(&self, pool: &BufferPool) -> Option<Buf> {
        critical_section::with(|cs| {
            let mut state = pool.state.borrow_ref_mut(cs);

            let mut ends = self.ends.borrow(cs).get();

            let index = ends.head?;

            ends.head = state.next[index as usize].take();

            if ends.head.is_none() {
                ends.tail = None;
            }

            ends.len -= 1;

            self.ends.borrow(cs).set(ends);

            Some(pool.mint(index))
        })
    }

    /// Inspect the buffer at the front of the queue without removing it
    pub fn peek<F, R>(&self, pool: &BufferPool, f: F) -> Option<R>
    where
        F: FnOnce(&Buffer) -> R,
    {
        let head = critical_section::with(|cs| self.ends.borrow(cs).get().head)?;

        // The head is owned by this queue, the token is only used for the access and then
        // forgotten so that ownership stays with the queue.
        let token = core::mem::ManuallyDrop::new(pool.mint(head));

        Some(f(pool.buffer(&token)))
    }

    /// Return every buffer within the queue to the pool
    pub fn clear(&self, pool: &BufferPool) {
        while let Some(buf) = self.pop(pool) {
            pool.release(buf)
        }
    }
}

impl Default for PduQueue {
    fn default() -> Self {
        PduQueue::new()
    }
}

impl core::fmt::Debug for PduQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PduQueue").field("len", &self.len()).finish()
    }
}
