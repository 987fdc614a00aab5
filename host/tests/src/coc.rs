//! Connection-oriented channels over the simulated link

use crate::central::Central;
use crate::{Air, Sim};
use gorm::Host;
use gorm_l2cap::coc::CocEvent;
use gorm_l2cap::signals::{EncodeSignal, Signal};
use std::sync::{Arc, Mutex};

/// The channel identifier of the LE signalling channel
pub const SIGNALING_CID: u16 = 0x0005;

/// An owned [`CocEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Connected,
    Refused(u16),
    Sdu(Vec<u8>),
    Disconnected,
}

/// Records the events of a channel
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Received>>>);

impl Recorder {
    /// Create the callback of a channel
    pub fn callback(&self) -> impl FnMut(CocEvent<'_>) + Send + 'static {
        let recorded = self.0.clone();

        move |event: CocEvent<'_>| {
            let received = match event {
                CocEvent::Connected => Received::Connected,
                CocEvent::Refused(result) => Received::Refused(result),
                CocEvent::Sdu(reader) => Received::Sdu(reader.to_vec()),
                CocEvent::Disconnected => Received::Disconnected,
            };

            recorded.lock().unwrap().push(received)
        }
    }

    pub fn take(&self) -> Vec<Received> {
        core::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Encode a signal
pub fn encode<S: EncodeSignal>(signal: S) -> Vec<u8> {
    let mut raw = Vec::new();

    signal.encode(&mut raw).unwrap();

    raw
}

/// Create a K-frame
///
/// The first K-frame of an SDU is prefixed with the SDU length `sdu_len`.
pub fn k_frame(sdu_len: Option<usize>, data: &[u8]) -> Vec<u8> {
    let mut frame = sdu_len
        .map(|len| (len as u16).to_le_bytes().to_vec())
        .unwrap_or_default();

    frame.extend_from_slice(data);

    frame
}

/// Split the L2CAP PDUs received by the central into signals and everything else
pub fn split_signals(pdus: Vec<(u16, Vec<u8>)>) -> (Vec<Signal>, Vec<(u16, Vec<u8>)>) {
    let (signals, others): (Vec<_>, Vec<_>) = pdus.into_iter().partition(|(cid, _)| *cid == SIGNALING_CID);

    let signals = signals
        .iter()
        .map(|(_, raw)| Signal::try_from_raw(raw).unwrap())
        .collect();

    (signals, others)
}

/// Give the pending events of the link layer to the host
pub fn dispatch(sim: &mut Sim, host: &mut Host) -> usize {
    let events = sim.events();

    for (handle, event) in events.iter().copied() {
        host.on_event(handle, event)
    }

    events.len()
}

/// Run `count` connection events with the host processing the link layer events after each
pub fn run_with_host(sim: &mut Sim, host: &mut Host, central: &mut Central, count: usize) {
    dispatch(sim, host);

    for _ in 0..count {
        sim.connection_event(central, |_| Air::Delivered);

        dispatch(sim, host);
    }
}
