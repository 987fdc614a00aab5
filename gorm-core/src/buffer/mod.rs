//! Radio Packet Buffers
//!
//! Every packet that goes over the air, in either direction, lives in a [`Buffer`] taken from a
//! [`BufferPool`]. The pool is a fixed arena that is allocated once when the stack is created.
//! Buffers are never freed individually, they are only ever returned to the pool.
//!
//! # Ownership
//! A buffer is referenced by a [`Buf`] handle. A `Buf` is a move-only token: it cannot be cloned
//! or copied, so exactly one owner exists for every buffer that is not in the pool. The owner is
//! either a component holding the token directly (the link layer's in-flight TX/RX slots) or a
//! [`PduQueue`] that took the token on `push` and hands it back out on `pop`. Returning a buffer
//! to the pool consumes its token, which makes a double return a compile error.
//!
//! # Interrupt Safety
//! The free list and the buffer links are guarded by a [`critical_section::Mutex`]. Every pool
//! and queue operation is O(1) (with the exception of [`BufferPool::allocate`], which is O(n)
//! in the number of requested buffers) and may be called from interrupt context.
//!
//! [`PduQueue`]: queue::PduQueue

pub mod queue;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::{RefCell, UnsafeCell};
use core::fmt::{Debug, Display, Formatter};
use critical_section::Mutex;

/// The capacity of the payload of a [`Buffer`]
///
/// This is the largest payload of an advertising channel PDU, the largest PDU this stack sends or
/// receives.
pub const BUFFER_PAYLOAD_SIZE: usize = 37;

/// Try to extend a collection with an iterator
///
/// This is the fallible equivalent to [`Extend`](core::iter::Extend). It is implemented by
/// [`Buffer`] as a buffer has a finite capacity.
pub trait TryExtend<A> {
    type Error: Debug + Display;

    fn try_extend<T>(&mut self, iter: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = A>;

    fn try_extend_one(&mut self, item: A) -> Result<(), Self::Error> {
        self.try_extend(core::iter::once(item))
    }
}

impl<A> TryExtend<A> for Vec<A> {
    type Error = core::convert::Infallible;

    fn try_extend<T>(&mut self, iter: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = A>,
    {
        self.extend(iter);

        Ok(())
    }
}

/// The logical link identifier of a data channel PDU
///
/// The LLID is the two least significant bits of the `flags` of a data channel [`Buffer`]. The
/// host marks the fragments of an L2CAP PDU with it, and the link layer marks its control PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Llid {
    /// Continuation fragment of an L2CAP PDU, or an empty PDU
    DataCont,
    /// Start of an L2CAP PDU
    DataStart,
    /// LL control PDU
    Control,
}

impl Llid {
    pub const MASK: u8 = 0b11;

    pub fn into_raw(self) -> u8 {
        match self {
            Llid::DataCont => 0b01,
            Llid::DataStart => 0b10,
            Llid::Control => 0b11,
        }
    }

    pub fn try_from_raw(raw: u8) -> Option<Self> {
        match raw & Self::MASK {
            0b01 => Some(Llid::DataCont),
            0b10 => Some(Llid::DataStart),
            0b11 => Some(Llid::Control),
            _ => None,
        }
    }
}

/// A radio packet
///
/// A `Buffer` contains the two octet PDU header (the `flags` octet and the length) and the
/// payload of the PDU. The meaning of `flags` depends on the kind of PDU, for an advertising
/// channel PDU it contains the PDU type and the address type bits, for a data channel PDU it
/// contains the LLID, NESN, SN, and MD bits.
#[derive(Clone)]
pub struct Buffer {
    pub flags: u8,
    length: u8,
    payload: [u8; BUFFER_PAYLOAD_SIZE],
}

impl Buffer {
    /// Create a new empty buffer
    pub const fn new() -> Self {
        Buffer {
            flags: 0,
            length: 0,
            payload: [0; BUFFER_PAYLOAD_SIZE],
        }
    }

    /// Get the length of the payload
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Get the number of payload bytes that can still be added
    pub fn remaining_capacity(&self) -> usize {
        BUFFER_PAYLOAD_SIZE - self.len()
    }

    /// Get the over the air header of this buffer
    pub fn header(&self) -> [u8; 2] {
        [self.flags, self.length]
    }

    /// Get the payload
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.len()]
    }

    /// Get the payload mutably
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len();

        &mut self.payload[..len]
    }

    /// Get the full payload area, including the unused part
    ///
    /// This is used by radio drivers to write received bytes directly into the buffer. The length
    /// must then be set with [`set_len`](Buffer::set_len).
    pub fn payload_area(&mut self) -> &mut [u8; BUFFER_PAYLOAD_SIZE] {
        &mut self.payload
    }

    /// Set the length of the payload
    ///
    /// # Error
    /// An error is returned if `len` is larger than [`BUFFER_PAYLOAD_SIZE`].
    pub fn set_len(&mut self, len: usize) -> Result<(), BufferError> {
        if len > BUFFER_PAYLOAD_SIZE {
            Err(BufferError::Overflow)
        } else {
            self.length = len as u8;

            Ok(())
        }
    }

    /// Replace the payload with `data`
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if data.len() > BUFFER_PAYLOAD_SIZE {
            return Err(BufferError::Overflow);
        }

        self.payload[..data.len()].copy_from_slice(data);

        self.length = data.len() as u8;

        Ok(())
    }

    /// Append `data` to the payload
    pub fn extend_from_slice(&mut self, data: &[u8]) -> Result<(), BufferError> {
        let start = self.len();

        let end = start + data.len();

        if end > BUFFER_PAYLOAD_SIZE {
            return Err(BufferError::Overflow);
        }

        self.payload[start..end].copy_from_slice(data);

        self.length = end as u8;

        Ok(())
    }

    /// Remove `count` bytes from the front of the payload
    ///
    /// The remaining bytes are moved to the start of the payload. If `count` is larger than the
    /// payload, the payload is cleared.
    pub fn strip_front(&mut self, count: usize) {
        let len = self.len();

        if count >= len {
            self.length = 0;
        } else {
            self.payload.copy_within(count..len, 0);

            self.length = (len - count) as u8;
        }
    }

    /// Get the LLID of a data channel PDU
    pub fn llid(&self) -> Option<Llid> {
        Llid::try_from_raw(self.flags)
    }

    /// Set the LLID of a data channel PDU
    ///
    /// The other bits of `flags` are cleared.
    pub fn set_llid(&mut self, llid: Llid) {
        self.flags = llid.into_raw();
    }

    /// Clear the flags and the payload
    pub fn clear(&mut self) {
        self.flags = 0;
        self.length = 0;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("flags", &format_args!("{:#04x}", self.flags))
            .field("payload", &self.data())
            .finish()
    }
}

impl TryExtend<u8> for Buffer {
    type Error = BufferError;

    fn try_extend<T>(&mut self, iter: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = u8>,
    {
        for byte in iter {
            if self.len() == BUFFER_PAYLOAD_SIZE {
                return Err(BufferError::Overflow);
            }

            self.payload[self.len()] = byte;

            self.length += 1;
        }

        Ok(())
    }
}

/// Error for writing to a [`Buffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The data does not fit within the payload of a buffer
    Overflow,
}

impl Display for BufferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BufferError::Overflow => f.write_str("data does not fit within the buffer payload"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BufferError {}

/// The handle to a buffer of a [`BufferPool`]
///
/// A `Buf` is the proof of ownership of a buffer. The contents of the buffer are accessed via
/// [`BufferPool::buffer`] and [`BufferPool::buffer_mut`].
///
/// # Note
/// A `Buf` must only be used with the pool that created it. Dropping a `Buf` without returning
/// it to the pool (or pushing it to a queue) leaks the buffer.
#[must_use]
pub struct Buf {
    index: u16,
}

impl Buf {
    /// Get the index of the buffer within the pool
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl Debug for Buf {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "Buf({})", self.index)
    }
}

/// Links between buffers
///
/// The `next` table is shared by the free list and every [`PduQueue`](queue::PduQueue) as a
/// buffer can only ever be in one of them.
pub(crate) struct PoolState {
    pub(crate) next: Box<[Option<u16>]>,
    free_head: Option<u16>,
    free_count: usize,
}

/// The pool of radio packet buffers
///
/// This is the arena for every [`Buffer`] used by the stack.
pub struct BufferPool {
    slots: Box<[UnsafeCell<Buffer>]>,
    pub(crate) state: Mutex<RefCell<PoolState>>,
}

// A buffer is only ever accessed through its `Buf`, and there is exactly one `Buf` per buffer
// that is not within the free list.
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// The maximum number of buffers within a pool
    pub const MAX_BUFFERS: usize = u16::MAX as usize;

    /// Create a new `BufferPool` containing `count` buffers
    ///
    /// # Panic
    /// `count` cannot be larger than [`MAX_BUFFERS`](BufferPool::MAX_BUFFERS).
    pub fn new(count: usize) -> Self {
        assert!(count <= Self::MAX_BUFFERS, "too many buffers for a pool");

        let slots = (0..count)
            .map(|_| UnsafeCell::new(Buffer::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let next = (0..count)
            .map(|index| (index + 1 < count).then(|| (index + 1) as u16))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let free_head = (count != 0).then_some(0);

        let state = Mutex::new(RefCell::new(PoolState {
            next,
            free_head,
            free_count: count,
        }));

        BufferPool { slots, state }
    }

    /// Get the total number of buffers of this pool
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Get the number of buffers currently within the pool
    pub fn free_count(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).free_count)
    }

    /// Try to get a single buffer
    ///
    /// The returned buffer is cleared. `None` is returned if the pool is empty.
    pub fn get(&self) -> Option<Buf> {
        self.allocate(1)?.next()
    }

    /// Allocate `count` buffers
    ///
    /// Either all `count` buffers are taken from the pool or none are. An empty pool is an
    /// expected condition, so `None` is returned if fewer than `count` buffers are free.
    ///
    /// Every buffer is cleared as it is taken out of the returned `BufferChain`.
    pub fn allocate(&self, count: usize) -> Option<BufferChain<'_>> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);

            if state.free_count < count {
                log::trace!("(POOL) cannot allocate {} buffers, {} are free", count, state.free_count);

                return None;
            }

            let head = state.free_head;

            let mut tail = None;

            let mut current = head;

            for _ in 0..count {
                let index = current?;

                tail = Some(index);

                current = state.next[index as usize];
            }

            if let Some(tail) = tail {
                state.next[tail as usize] = None;
            }

            state.free_head = current;

            state.free_count -= count;

            let head = if count == 0 { None } else { head };

            Some(BufferChain {
                pool: self,
                head,
                len: count,
            })
        })
    }

    /// Return a buffer to the pool
    pub fn release(&self, buf: Buf) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);

            let head = state.free_head;

            state.next[buf.index()] = head;

            state.free_head = Some(buf.index);

            state.free_count += 1;
        })
    }

    /// Get the buffer referenced by `buf`
    pub fn buffer(&self, buf: &Buf) -> &Buffer {
        unsafe { &*self.slots[buf.index()].get() }
    }

    /// Get the buffer referenced by `buf` mutably
    #[allow(clippy::mut_from_ref)]
    pub fn buffer_mut(&self, buf: &mut Buf) -> &mut Buffer {
        unsafe { &mut *self.slots[buf.index()].get() }
    }

    /// Create the token for the buffer at `index`
    ///
    /// The caller must have removed the buffer at `index` from whatever list held it.
    pub(crate) fn mint(&self, index: u16) -> Buf {
        Buf { index }
    }
}

impl Debug for BufferPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .finish()
    }
}

/// A chain of buffers allocated by [`BufferPool::allocate`]
///
/// A `BufferChain` is an iterator of [`Buf`]. Buffers that were not taken out of the chain are
/// returned to the pool when the chain is dropped.
pub struct BufferChain<'a> {
    pool: &'a BufferPool,
    head: Option<u16>,
    len: usize,
}

impl BufferChain<'_> {
    /// Get the number of buffers left within this chain
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Iterator for BufferChain<'_> {
    type Item = Buf;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.head?;

        self.head = critical_section::with(|cs| self.pool.state.borrow_ref(cs).next[index as usize]);

        self.len -= 1;

        let mut buf = self.pool.mint(index);

        self.pool.buffer_mut(&mut buf).clear();

        Some(buf)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl ExactSizeIterator for BufferChain<'_> {}

impl Drop for BufferChain<'_> {
    fn drop(&mut self) {
        while let Some(index) = self.head.take() {
            self.head = critical_section::with(|cs| self.pool.state.borrow_ref(cs).next[index as usize]);

            self.pool.release(self.pool.mint(index));
        }
    }
}
