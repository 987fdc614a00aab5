//! LL Control Procedures
//!
//! The peripheral only ever responds to control procedures, it never initiates one (the only
//! exception being `LL_TERMINATE_IND` for a local disconnect).

use crate::config;
use crate::connection::{ConnFlags, Connection};
use crate::pdu::{
    instant_passed, ChannelMapUpdate, ConnectIndError, ConnectionUpdate, ControlOpcode, DataHeader, Llid,
};
use gorm_core::buffer::{Buf, Buffer, BufferPool};
use gorm_core::{Error, Link};

/// The result of processing a control PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The PDU was consumed without a response
    Consumed,
    /// A response was queued to the TX queue
    Replied,
    /// The central terminated the connection
    Terminated(Error),
    /// The instant of an update is in the past
    InstantPassed,
    /// A connection update carries parameters the connection cannot use
    InvalidParameters(ConnectIndError),
}

/// Write a control PDU into `buffer`
///
/// `ctr_data` is always one of the fixed size control data fields of this module.
pub(crate) fn write_control(buffer: &mut Buffer, opcode: ControlOpcode, ctr_data: &[u8]) {
    buffer.flags = DataHeader::new(Llid::Control).0;

    let area = buffer.payload_area();

    let len = 1 + ctr_data.len().min(area.len() - 1);

    area[0] = opcode.into_raw();

    area[1..len].copy_from_slice(&ctr_data[..len - 1]);

    // cannot fail, `len` is within the payload area
    let _ = buffer.set_len(len);
}

/// Check if a buffer holds an `LL_TERMINATE_IND`
pub(crate) fn is_terminate_ind(buffer: &Buffer) -> bool {
    DataHeader(buffer.flags).llid() == Some(Llid::Control)
        && buffer.data().first() == Some(&ControlOpcode::TerminateInd.into_raw())
}

fn version_ind() -> [u8; 5] {
    let mut ctr_data = [0u8; 5];

    ctr_data[0] = config::VERSION_NUMBER;
    ctr_data[1..3].copy_from_slice(&config::COMPANY_ID.to_le_bytes());
    ctr_data[3..5].copy_from_slice(&config::SUB_VERSION.to_le_bytes());

    ctr_data
}

/// Process a received control PDU
///
/// The buffer `buf` is either reused for the response or returned to the pool.
pub(crate) fn process(connection: &mut Connection, pool: &BufferPool, link: &Link, mut buf: Buf) -> Outcome {
    let buffer = pool.buffer_mut(&mut buf);

    let Some((&raw_opcode, ctr_data)) = buffer.data().split_first() else {
        pool.release(buf);

        return Outcome::Consumed;
    };

    let Some(opcode) = ControlOpcode::try_from_raw(raw_opcode) else {
        log::trace!("(LL) dropping control PDU with unknown opcode {:#x}", raw_opcode);

        pool.release(buf);

        return Outcome::Consumed;
    };

    log::trace!("(LL) received {:?}", opcode);

    let outcome = match opcode {
        ControlOpcode::ConnectionUpdateInd => match ConnectionUpdate::try_from_ctr_data(ctr_data) {
            // a timing update is applied at the end of the event before its instant
            Some(update) if update.instant == connection.event_counter => Outcome::InstantPassed,
            Some(update) if instant_passed(update.instant, connection.event_counter) => Outcome::InstantPassed,
            Some(update) => match update.validate() {
                Err(e) => Outcome::InvalidParameters(e),
                Ok(()) => {
                    log::debug!("(LL) connection update at instant {}", update.instant);

                    connection.pending_timing = Some(update);

                    Outcome::Consumed
                }
            },
            None => Outcome::Consumed,
        },
        ControlOpcode::ChannelMapInd => match ChannelMapUpdate::try_from_ctr_data(ctr_data) {
            Some(update) if instant_passed(update.instant, connection.event_counter) => Outcome::InstantPassed,
            Some(update) if update.channel_map.count() < 2 => {
                log::debug!("(LL) ignoring channel map with fewer than two channels");

                Outcome::Consumed
            }
            Some(update) => {
                log::debug!("(LL) channel map update at instant {}", update.instant);

                connection.pending_channel_map = Some(update);

                Outcome::Consumed
            }
            None => Outcome::Consumed,
        },
        ControlOpcode::TerminateInd => {
            let reason = ctr_data.first().copied().map(Error::from).unwrap_or(Error::UnspecifiedError);

            Outcome::Terminated(reason)
        }
        ControlOpcode::FeatureReq => {
            write_control(buffer, ControlOpcode::FeatureRsp, &config::FEATURES.to_le_bytes());

            Outcome::Replied
        }
        ControlOpcode::VersionInd if connection.flags.get(ConnFlags::VERSION_SENT) => Outcome::Consumed,
        ControlOpcode::VersionInd => {
            connection.flags.set(ConnFlags::VERSION_SENT, true);

            write_control(buffer, ControlOpcode::VersionInd, &version_ind());

            Outcome::Replied
        }
        #[cfg(feature = "ping")]
        ControlOpcode::PingReq => {
            write_control(buffer, ControlOpcode::PingRsp, &[]);

            Outcome::Replied
        }
        ControlOpcode::UnknownRsp
        | ControlOpcode::FeatureRsp
        | ControlOpcode::PingRsp
        | ControlOpcode::RejectInd
        | ControlOpcode::RejectIndExt => Outcome::Consumed,
        _ => {
            write_control(buffer, ControlOpcode::UnknownRsp, &[raw_opcode]);

            Outcome::Replied
        }
    };

    match outcome {
        Outcome::Replied => link.tx_queue().push(pool, buf),
        _ => pool.release(buf),
    }

    outcome
}
