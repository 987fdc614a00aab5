//! L2CAP PDUs
//!
//! Every L2CAP PDU starts with the basic header of the length of the information payload and the
//! channel identifier. A PDU is sent over the LE link as one or more LL fragments, the first is
//! marked with [`Llid::DataStart`] and the rest with [`Llid::DataCont`].
//!
//! The PDUs of a connection-oriented channel are K-frames. The SDU is split over one or more
//! K-frames, the first K-frame also contains the two byte length of the SDU.

use crate::config::{HEADER_SIZE, LL_FRAGMENT_SIZE, MIN_MPS, SDU_LEN_SIZE};
use gorm_core::buffer::queue::PduQueue;
use gorm_core::buffer::{BufferChain, BufferError, BufferPool, Llid, TryExtend};

/// The basic L2CAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capHeader {
    /// The length of the information payload
    pub length: u16,
    pub cid: u16,
}

impl L2capHeader {
    pub fn new(length: usize, cid: u16) -> Self {
        L2capHeader {
            length: length as u16,
            cid,
        }
    }

    /// Try to decode the header at the start of `raw`
    pub fn try_from_slice(raw: &[u8]) -> Option<Self> {
        let header = raw.get(..HEADER_SIZE)?;

        Some(L2capHeader {
            length: <u16>::from_le_bytes([header[0], header[1]]),
            cid: <u16>::from_le_bytes([header[2], header[3]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [l0, l1] = self.length.to_le_bytes();
        let [c0, c1] = self.cid.to_le_bytes();

        [l0, l1, c0, c1]
    }
}

/// Get the number of LL fragments needed to send a PDU
///
/// Input `len` is the length of the information payload.
pub fn fragment_count(len: usize) -> usize {
    (HEADER_SIZE + len).div_ceil(LL_FRAGMENT_SIZE)
}

/// Split a PDU into LL fragments and push them onto `queue`
///
/// The first `len` bytes of `payload` are the information payload of the PDU. `buffers` must
/// contain at least [`fragment_count(len)`](fragment_count) buffers, otherwise an error is
/// returned after the fragments that could be created were queued.
pub fn fragment<I>(
    pool: &BufferPool,
    buffers: &mut BufferChain<'_>,
    queue: &PduQueue,
    cid: u16,
    len: usize,
    payload: I,
) -> Result<(), BufferError>
where
    I: Iterator<Item = u8>,
{
    let mut bytes = L2capHeader::new(len, cid).to_bytes().into_iter().chain(payload.take(len));

    let mut llid = Llid::DataStart;

    for _ in 0..fragment_count(len) {
        let mut buf = buffers.next().ok_or(BufferError::Overflow)?;

        let buffer = pool.buffer_mut(&mut buf);

        buffer.set_llid(llid);

        let result = buffer.try_extend(bytes.by_ref().take(LL_FRAGMENT_SIZE));

        queue.push(pool, buf);

        result?;

        llid = Llid::DataCont;
    }

    Ok(())
}

/// The sizes of the K-frames of an SDU
///
/// Each item is the length of the information payload of a K-frame, the first one includes the
/// SDU length field. An empty SDU is still sent within one K-frame.
#[derive(Debug, Clone)]
pub struct KFrameSizes {
    remaining: usize,
    mps: usize,
    first: bool,
}

impl KFrameSizes {
    pub fn new(sdu_len: usize, mps: u16) -> Self {
        KFrameSizes {
            remaining: sdu_len,
            mps: mps.max(MIN_MPS).into(),
            first: true,
        }
    }
}

impl Iterator for KFrameSizes {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;

            let amount = core::cmp::min(self.remaining, self.mps - SDU_LEN_SIZE);

            self.remaining -= amount;

            Some(amount + SDU_LEN_SIZE)
        } else if self.remaining == 0 {
            None
        } else {
            let amount = core::cmp::min(self.remaining, self.mps);

            self.remaining -= amount;

            Some(amount)
        }
    }
}
