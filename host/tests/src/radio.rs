//! The simulated radio

use gorm_core::buffer::Buffer;
use gorm_ll::radio::{RadioContext, RadioDriver, RxInfo};

/// The time to send a packet of `len` payload bytes at 1 Mbit/s
///
/// This includes the preamble, access address, header, and CRC.
pub fn airtime(len: usize) -> u32 {
    (10 + len as u32) * 8
}

/// A packet on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirPacket {
    pub context: RadioContext,
    pub header: [u8; 2],
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Idle,
    Sending,
    Listening,
}

#[derive(Debug, Clone)]
struct Incoming {
    header: [u8; 2],
    payload: Vec<u8>,
    crc_ok: bool,
}

/// A radio driver that records what is sent and receives what the test delivers
#[derive(Debug, Default)]
pub struct SimRadio {
    context: Option<RadioContext>,
    state: RadioState,
    in_air: Option<AirPacket>,
    incoming: Option<Incoming>,
    sent: Vec<AirPacket>,
}

impl SimRadio {
    pub fn state(&self) -> RadioState {
        self.state
    }

    /// Get the context the radio is listening on
    pub fn listening(&self) -> Option<RadioContext> {
        match self.state {
            RadioState::Listening => self.context,
            _ => None,
        }
    }

    /// Every packet sent so far
    pub fn sent(&self) -> &[AirPacket] {
        &self.sent
    }

    pub(crate) fn finish_send(&mut self) -> Option<AirPacket> {
        let packet = self.in_air.take()?;

        self.state = RadioState::Idle;

        Some(packet)
    }

    pub(crate) fn receive(&mut self, header: [u8; 2], payload: &[u8], crc_ok: bool) -> bool {
        if self.state != RadioState::Listening {
            return false;
        }

        self.state = RadioState::Idle;

        self.incoming = Some(Incoming {
            header,
            payload: payload.to_vec(),
            crc_ok,
        });

        true
    }
}

impl RadioDriver for SimRadio {
    type Error = &'static str;

    fn set_context(&mut self, context: &RadioContext) -> Result<(), Self::Error> {
        self.context = Some(*context);

        Ok(())
    }

    fn send(&mut self, header: [u8; 2], payload: &[u8]) -> Result<(), Self::Error> {
        let context = self.context.ok_or("no radio context")?;

        if usize::from(header[1]) != payload.len() {
            return Err("header length does not match the payload");
        }

        let packet = AirPacket {
            context,
            header,
            payload: payload.to_vec(),
        };

        self.sent.push(packet.clone());

        self.in_air = Some(packet);

        self.state = RadioState::Sending;

        Ok(())
    }

    fn listen(&mut self) -> Result<(), Self::Error> {
        self.context.ok_or("no radio context")?;

        self.state = RadioState::Listening;

        Ok(())
    }

    fn recv(&mut self, buffer: &mut Buffer) -> Result<RxInfo, Self::Error> {
        let incoming = self.incoming.take().ok_or("nothing was received")?;

        buffer.flags = incoming.header[0];

        buffer.set_data(&incoming.payload).map_err(|_| "packet too large")?;

        Ok(RxInfo {
            crc_ok: incoming.crc_ok,
            rssi: -40,
        })
    }

    fn stop(&mut self) {
        self.state = RadioState::Idle;

        self.in_air = None;
    }
}
