use gorm_core::buffer::Llid;
use gorm_core::{ConnHandle, Error};
use gorm_ll::config::{COMPANY_ID, FEATURES, SUB_VERSION, VERSION_NUMBER};
use gorm_ll::notify::Event;
use gorm_ll::pdu::ControlOpcode;
use gorm_ll::{LlError, State};
use gorm_tests::central::{Central, DataPdu};
use gorm_tests::radio::RadioState;
use gorm_tests::{init_logging, Air, Sim};

const SLOT: ConnHandle = ConnHandle::new(0);

fn connected() -> (Sim, Central) {
    let mut sim = Sim::new(16, 1);

    let mut central = Central::new(7);

    sim.connect(SLOT, &mut central).unwrap();

    assert_eq!(vec![(SLOT, Event::Connected)], sim.events());

    sim.run_events(&mut central, 1);

    (sim, central)
}

fn control(opcode: ControlOpcode, ctr_data: &[u8]) -> DataPdu {
    let mut payload = vec![opcode.into_raw()];

    payload.extend_from_slice(ctr_data);

    DataPdu {
        llid: Llid::Control,
        payload,
    }
}

#[test]
fn feature_exchange() {
    init_logging();

    let (mut sim, mut central) = connected();

    central.send_control(ControlOpcode::FeatureReq, &[0xFF, 0, 0, 0, 0, 0, 0, 0]);

    sim.run_events(&mut central, 2);

    assert_eq!(
        vec![control(ControlOpcode::FeatureRsp, &FEATURES.to_le_bytes())],
        central.take_received()
    );

    assert!(sim.events().is_empty());
}

#[test]
fn version_exchange() {
    let (mut sim, mut central) = connected();

    central.send_control(ControlOpcode::VersionInd, &[0x0A, 0x59, 0x00, 0x01, 0x00]);

    sim.run_events(&mut central, 2);

    let mut version = vec![VERSION_NUMBER];

    version.extend_from_slice(&COMPANY_ID.to_le_bytes());
    version.extend_from_slice(&SUB_VERSION.to_le_bytes());

    assert_eq!(
        vec![control(ControlOpcode::VersionInd, &version)],
        central.take_received()
    );

    // the version is only sent once per connection
    central.send_control(ControlOpcode::VersionInd, &[0x0A, 0x59, 0x00, 0x01, 0x00]);

    sim.run_events(&mut central, 2);

    assert!(central.take_received().is_empty());
}

#[test]
fn ping() {
    let (mut sim, mut central) = connected();

    central.send_control(ControlOpcode::PingReq, &[]);

    sim.run_events(&mut central, 2);

    assert_eq!(vec![control(ControlOpcode::PingRsp, &[])], central.take_received());
}

#[test]
fn unsupported_procedures() {
    let (mut sim, mut central) = connected();

    // encryption is not supported
    central.send_control(ControlOpcode::EncReq, &[0; 22]);

    // a response to a request the peripheral never made is dropped
    central.send_control(ControlOpcode::PingRsp, &[]);

    // so is an opcode that does not exist
    central.send(Llid::Control, &[0xFE, 1, 2, 3]);

    central.send_control(ControlOpcode::LengthReq, &[27, 0, 0x48, 0x01, 27, 0, 0x48, 0x01]);

    sim.run_events(&mut central, 3);

    assert_eq!(
        vec![
            control(ControlOpcode::UnknownRsp, &[ControlOpcode::EncReq.into_raw()]),
            control(ControlOpcode::UnknownRsp, &[ControlOpcode::LengthReq.into_raw()]),
        ],
        central.take_received()
    );

    assert_eq!(State::Connected, sim.ll().state(SLOT));

    assert!(sim.events().is_empty());
}

#[test]
fn control_pdus_are_answered_in_order() {
    let (mut sim, mut central) = connected();

    central.send(Llid::DataStart, &[1, 2, 3]);

    central.send_control(ControlOpcode::PingReq, &[]);

    central.send_control(ControlOpcode::FeatureReq, &[0; 8]);

    central.send(Llid::DataStart, &[4, 5, 6]);

    sim.run_events(&mut central, 2);

    assert_eq!(
        vec![
            control(ControlOpcode::PingRsp, &[]),
            control(ControlOpcode::FeatureRsp, &FEATURES.to_le_bytes()),
        ],
        central.take_received()
    );

    // only the data PDUs are given to the host
    let stack = sim.stack();

    assert_eq!(2, stack.link(SLOT).unwrap().rx_queue().len());

    assert_eq!(
        vec![(SLOT, Event::Data), (SLOT, Event::Data)],
        sim.events()
    );
}

#[test]
fn terminated_by_the_central() {
    init_logging();

    let (mut sim, mut central) = connected();

    central.send(Llid::DataStart, &[1, 2, 3]);

    central.send_control(
        ControlOpcode::TerminateInd,
        &[Error::RemoteUserTerminatedConnection.code()],
    );

    sim.connection_event(&mut central, |_| Air::Delivered);

    assert_eq!(vec![(SLOT, Event::Data), (SLOT, Event::ConnClosed)], sim.events());

    assert_eq!(State::Standby, sim.ll().state(SLOT));

    assert_eq!(RadioState::Idle, sim.radio().state());

    // the closed link keeps nothing, not even unread data
    assert!(sim.stack().link(SLOT).unwrap().rx_queue().is_empty());

    assert_eq!(16, sim.stack().pool().free_count());

    assert_eq!(None, sim.connection_event(&mut central, |_| Air::Delivered).channel);
}

#[test]
fn terminated_by_the_peripheral() {
    init_logging();

    let (mut sim, mut central) = connected();

    sim.ll_mut()
        .terminate(SLOT, Error::RemoteUserTerminatedConnection)
        .unwrap();

    // terminating twice does nothing
    sim.ll_mut()
        .terminate(SLOT, Error::RemoteUserTerminatedConnection)
        .unwrap();

    sim.connection_event(&mut central, |_| Air::Delivered);

    assert_eq!(
        vec![control(
            ControlOpcode::TerminateInd,
            &[Error::RemoteUserTerminatedConnection.code()]
        )],
        central.take_received()
    );

    // still connected until the central acknowledges the LL_TERMINATE_IND
    assert_eq!(State::Connected, sim.ll().state(SLOT));

    assert!(sim.events().is_empty());

    sim.connection_event(&mut central, |_| Air::Delivered);

    assert_eq!(vec![(SLOT, Event::ConnClosed)], sim.events());

    assert_eq!(State::Standby, sim.ll().state(SLOT));

    assert_eq!(16, sim.stack().pool().free_count());

    assert_eq!(
        Err(LlError::NotConnected),
        sim.ll_mut().terminate(SLOT, Error::RemoteUserTerminatedConnection)
    );
}

#[test]
fn terminate_with_pending_data() {
    let (mut sim, mut central) = connected();

    let stack = sim.stack();

    let pool = stack.pool();

    for n in 0..3u8 {
        let mut buf = pool.get().unwrap();

        pool.buffer_mut(&mut buf).set_llid(Llid::DataStart);

        pool.buffer_mut(&mut buf).set_data(&[n; 5]).unwrap();

        stack.link(SLOT).unwrap().tx_queue().push(pool, buf);
    }

    sim.ll_mut()
        .terminate(SLOT, Error::ConnectionTerminatedByLocalHost)
        .unwrap();

    // the LL_TERMINATE_IND goes ahead of the data, which is never sent
    sim.connection_event(&mut central, |_| Air::Delivered);

    assert_eq!(
        vec![control(
            ControlOpcode::TerminateInd,
            &[Error::ConnectionTerminatedByLocalHost.code()]
        )],
        central.take_received()
    );

    assert_eq!(vec![(SLOT, Event::ConnClosed)], sim.events());

    assert!(stack.link(SLOT).unwrap().tx_queue().is_empty());

    assert_eq!(16, pool.free_count());
}
