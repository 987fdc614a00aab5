use gorm_core::buffer::Llid;
use gorm_core::{ConnHandle, Error};
use gorm_ll::config::ANCHOR_OFFSET;
use gorm_ll::notify::Event;
use gorm_ll::timer::TimerId;
use gorm_ll::State;
use gorm_tests::central::Central;
use gorm_tests::radio::RadioState;
use gorm_tests::{init_logging, Air, Sim};

const SLOT: ConnHandle = ConnHandle::new(0);

const BUFFERS: usize = 16;

fn connected() -> (Sim, Central) {
    let mut sim = Sim::new(BUFFERS, 1);

    let mut central = Central::new(7);

    sim.connect(SLOT, &mut central).unwrap();

    assert_eq!(vec![(SLOT, Event::Connected)], sim.events());

    sim.run_events(&mut central, 3);

    (sim, central)
}

/// The instant the supervision timeout expires if the central stays silent from now on
fn deadline(sim: &Sim, central: &Central) -> u32 {
    // the last packet was received at the anchor of the previous event
    let last_rx = central
        .anchor()
        .wrapping_sub(central.interval_us())
        .wrapping_add(ANCHOR_OFFSET);

    let deadline = last_rx.wrapping_add(central.timeout_us());

    assert_eq!(Some(deadline), sim.ll().timer().armed(TimerId::supervision(SLOT)));

    deadline
}

/// Run the connection events before `deadline` where every packet of the central has `fate`
fn run_silent(sim: &mut Sim, central: &mut Central, deadline: u32, fate: Air) {
    while central.anchor().wrapping_add(ANCHOR_OFFSET) < deadline {
        let report = sim.connection_event(central, |_| fate);

        assert!(report.channel.is_some());
    }
}

#[test]
fn connection_timeout() {
    init_logging();

    let (mut sim, mut central) = connected();

    let deadline = deadline(&sim, &central);

    run_silent(&mut sim, &mut central, deadline, Air::Lost);

    sim.run_until(deadline - 1);

    assert_eq!(State::Connected, sim.ll().state(SLOT));

    assert!(sim.events().is_empty());

    sim.run_until(deadline);

    assert_eq!(vec![(SLOT, Event::ConnTimeout)], sim.events());

    assert_eq!(State::Standby, sim.ll().state(SLOT));

    assert_eq!(RadioState::Idle, sim.radio().state());

    assert_eq!(BUFFERS, sim.stack().pool().free_count());

    // nothing happens on the slot afterwards
    let sent = sim.radio().sent().len();

    sim.run_for(10_000_000);

    assert!(sim.events().is_empty());

    assert_eq!(sent, sim.radio().sent().len());
}

#[test]
fn corrupted_packets_do_not_keep_the_connection() {
    let (mut sim, mut central) = connected();

    let deadline = deadline(&sim, &central);

    run_silent(&mut sim, &mut central, deadline, Air::CrcError);

    sim.run_until(deadline);

    assert_eq!(vec![(SLOT, Event::ConnTimeout)], sim.events());
}

#[test]
fn received_packets_keep_the_connection() {
    let (mut sim, mut central) = connected();

    let first_deadline = deadline(&sim, &central);

    // silent for most of the timeout
    for _ in 0..30 {
        sim.connection_event(&mut central, |_| Air::Lost);
    }

    sim.run_events(&mut central, 1);

    let deadline = deadline(&sim, &central);

    assert!(deadline > first_deadline);

    sim.run_until(first_deadline + 1);

    assert_eq!(State::Connected, sim.ll().state(SLOT));

    assert!(sim.events().is_empty());
}

#[test]
fn first_packet_never_received() {
    let mut sim = Sim::new(BUFFERS, 1);

    let mut central = Central::new(7);

    sim.connect(SLOT, &mut central).unwrap();

    let connected_at = sim.now();

    sim.run_until(connected_at + central.timeout_us() - 1);

    assert_eq!(vec![(SLOT, Event::Connected)], sim.events());

    sim.run_until(connected_at + central.timeout_us());

    assert_eq!(vec![(SLOT, Event::ConnTimeout)], sim.events());

    assert_eq!(BUFFERS, sim.stack().pool().free_count());
}

#[test]
fn timeout_while_terminating() {
    let (mut sim, mut central) = connected();

    let deadline = deadline(&sim, &central);

    sim.ll_mut()
        .terminate(SLOT, Error::RemoteUserTerminatedConnection)
        .unwrap();

    run_silent(&mut sim, &mut central, deadline, Air::Lost);

    sim.run_until(deadline);

    assert_eq!(vec![(SLOT, Event::ConnClosed)], sim.events());

    assert_eq!(BUFFERS, sim.stack().pool().free_count());
}

#[test]
fn queued_data_is_released() {
    let (mut sim, mut central) = connected();

    // the host never reads what the central sends
    for n in 0..4u8 {
        central.send(Llid::DataStart, &[n; 27]);
    }

    sim.run_events(&mut central, 1);

    let stack = sim.stack();

    let pool = stack.pool();

    for n in 0..4u8 {
        let mut buf = pool.get().unwrap();

        pool.buffer_mut(&mut buf).set_llid(Llid::DataCont);

        pool.buffer_mut(&mut buf).set_data(&[n; 27]).unwrap();

        stack.link(SLOT).unwrap().tx_queue().push(pool, buf);
    }

    assert_eq!(4, stack.link(SLOT).unwrap().rx_queue().len());

    // five seconds of silence
    for _ in 0..50 {
        sim.connection_event(&mut central, |_| Air::Lost);
    }

    assert_eq!(Some(&(SLOT, Event::ConnTimeout)), sim.events().last());

    assert!(stack.link(SLOT).unwrap().rx_queue().is_empty());

    assert!(stack.link(SLOT).unwrap().tx_queue().is_empty());

    assert_eq!(BUFFERS, pool.free_count());
}
