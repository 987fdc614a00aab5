use gorm_core::ConnHandle;
use gorm_ll::config::{ADV_ACCESS_ADDRESS, ADV_CHANNELS, ADV_EVENT_DURATION, ADV_JITTER_MAX};
use gorm_ll::notify::Event;
use gorm_ll::pdu::{AdvHeader, AdvPduType};
use gorm_ll::{AdvParams, LlError, State};
use gorm_tests::central::Central;
use gorm_tests::radio::RadioState;
use gorm_tests::{init_logging, Sim, ADV_ADDRESS, T_IFS};

const SLOT: ConnHandle = ConnHandle::new(0);

const INTERVAL: u32 = 100_000;

#[test]
fn advertising_events() {
    init_logging();

    let mut sim = Sim::new(8, 1);

    let mut params = AdvParams::new(ADV_ADDRESS, INTERVAL);

    params.set_adv_data(&[0x02, 0x01, 0x06]).unwrap();

    sim.ll_mut().advertise(SLOT, params).unwrap();

    assert_eq!(State::Advertising, sim.ll().state(SLOT));

    assert_eq!(6, sim.stack().pool().free_count());

    for channel in ADV_CHANNELS {
        let adv_ind = sim.finish_send().expect("no ADV_IND was sent");

        assert_eq!(channel, adv_ind.context.channel);

        assert_eq!(ADV_ACCESS_ADDRESS, adv_ind.context.access_address);

        assert_eq!(Some(AdvPduType::AdvInd), AdvHeader(adv_ind.header[0]).pdu_type());

        assert_eq!(ADV_ADDRESS, adv_ind.payload[..6]);

        assert_eq!([0x02u8, 0x01, 0x06], adv_ind.payload[6..]);

        // waiting for a request from a scanner or initiator
        assert_eq!(Some(channel), sim.radio().listening().map(|context| context.channel));

        sim.run_for(ADV_EVENT_DURATION);
    }

    // every channel was visited, the radio is idle until the next advertising event
    assert_eq!(RadioState::Idle, sim.radio().state());

    sim.run_until(INTERVAL - 1);

    assert_eq!(3, sim.radio().sent().len());

    sim.run_until(INTERVAL + ADV_JITTER_MAX);

    assert_eq!(4, sim.radio().sent().len());

    assert_eq!(ADV_CHANNELS[0], sim.radio().sent()[3].context.channel);

    assert!(sim.events().is_empty());
}

#[test]
fn random_address() {
    let mut sim = Sim::new(8, 1);

    sim.ll_mut()
        .advertise(SLOT, AdvParams::new(ADV_ADDRESS, INTERVAL).random_address())
        .unwrap();

    let adv_ind = sim.finish_send().unwrap();

    assert!(AdvHeader(adv_ind.header[0]).tx_add());

    // a CONNECT_IND for the public address is not for this advertiser
    let (header, payload) = Central::new(7).connect_ind(ADV_ADDRESS, false);

    sim.run_for(T_IFS);

    assert!(sim.deliver(header, &payload, true));

    assert_eq!(State::Advertising, sim.ll().state(SLOT));

    let (header, payload) = Central::new(7).connect_ind(ADV_ADDRESS, true);

    assert!(sim.deliver(header, &payload, true));

    assert_eq!(State::Connected, sim.ll().state(SLOT));
}

#[test]
fn scan_response() {
    init_logging();

    let mut sim = Sim::new(8, 1);

    let mut params = AdvParams::new(ADV_ADDRESS, INTERVAL);

    params.set_scan_rsp_data(&[0x05, 0x09, b'g', b'o', b'r', b'm']).unwrap();

    sim.ll_mut().advertise(SLOT, params).unwrap();

    sim.finish_send();

    sim.run_for(T_IFS);

    let header = [AdvHeader::new(AdvPduType::ScanReq, false).0, 12];

    let scanner: [u8; 6] = [0x5C; 6];

    // a SCAN_REQ for another advertiser is ignored
    let other = [scanner, [0x09; 6]].concat();

    assert!(sim.deliver(header, &other, true));

    assert!(sim.radio().listening().is_some());

    // as is one received with a CRC error
    let scan_req = [scanner, ADV_ADDRESS].concat();

    assert!(sim.deliver(header, &scan_req, false));

    assert!(sim.radio().listening().is_some());

    assert!(sim.deliver(header, &scan_req, true));

    sim.run_for(T_IFS);

    let scan_rsp = sim.finish_send().expect("no SCAN_RSP was sent");

    assert_eq!(Some(AdvPduType::ScanRsp), AdvHeader(scan_rsp.header[0]).pdu_type());

    assert_eq!(ADV_CHANNELS[0], scan_rsp.context.channel);

    assert_eq!(ADV_ADDRESS, scan_rsp.payload[..6]);

    assert_eq!(b"\x05\x09gorm", &scan_rsp.payload[6..]);

    assert_eq!(State::Advertising, sim.ll().state(SLOT));

    // advertising continues on the next channel
    sim.run_for(ADV_EVENT_DURATION);

    assert_eq!(ADV_CHANNELS[1], sim.finish_send().unwrap().context.channel);
}

#[test]
fn connect() {
    init_logging();

    let mut sim = Sim::new(8, 1);

    let mut central = Central::new(7);

    sim.connect(SLOT, &mut central).unwrap();

    assert_eq!(vec![(SLOT, Event::Connected)], sim.events());

    assert_eq!(State::Connected, sim.ll().state(SLOT));

    let info = sim.ll().connection_info(SLOT).unwrap();

    assert_eq!(central.address, info.peer_address);

    assert_eq!(central.access_address, info.access_address);

    assert_eq!(100_000, info.interval);

    assert_eq!(4_000_000, info.supervision_timeout);

    assert_eq!(central.channel(), info.channel);

    assert!(!info.anchored);

    let advertised = sim.radio().sent().len();

    let reports = sim.run_events(&mut central, 3);

    assert!(reports
        .iter()
        .all(|report| report.channel.is_some() && report.responses == 1));

    assert!(sim.ll().connection_info(SLOT).unwrap().anchored);

    // nothing was sent on the advertising channels after the CONNECT_IND
    assert!(sim.radio().sent()[advertised..]
        .iter()
        .all(|packet| packet.context.access_address == central.access_address));
}

#[test]
fn invalid_connect_ind() {
    init_logging();

    let invalid_hop = Central::new(4);

    let mut ch_sel = Central::new(7);

    ch_sel.ch_sel = true;

    let mut one_channel = Central::new(7);

    one_channel.channel_map = gorm_ll::channel::ChannelMap::from_channels([12]);

    let mut short_interval = Central::new(7);

    short_interval.interval = 5;

    let mut late_window = Central::new(7);

    late_window.win_offset = late_window.interval + 1;

    for mut central in [invalid_hop, ch_sel, one_channel, short_interval, late_window] {
        let mut sim = Sim::new(8, 1);

        sim.connect(SLOT, &mut central).unwrap();

        assert_eq!(vec![(SLOT, Event::ConnAbort)], sim.events());

        assert_eq!(State::Standby, sim.ll().state(SLOT));

        assert_eq!(None, sim.ll().connection_info(SLOT));

        assert_eq!(8, sim.stack().pool().free_count());

        // the slot does not keep advertising
        let sent = sim.radio().sent().len();

        sim.run_for(1_000_000);

        assert_eq!(sent, sim.radio().sent().len());
    }
}

#[test]
fn advertising_errors() {
    let params = AdvParams::new(ADV_ADDRESS, INTERVAL);

    let mut sim = Sim::new(8, 2);

    assert_eq!(
        Err(LlError::InvalidHandle(ConnHandle::new(2))),
        sim.ll_mut().advertise(ConnHandle::new(2), params)
    );

    sim.ll_mut().advertise(SLOT, params).unwrap();

    assert_eq!(
        Err(LlError::BusyState(State::Advertising)),
        sim.ll_mut().advertise(SLOT, params)
    );

    assert_eq!(
        Err(LlError::AlreadyAdvertising(SLOT)),
        sim.ll_mut().advertise(ConnHandle::new(1), params)
    );

    sim.ll_mut().stop_advertising(SLOT).unwrap();

    assert_eq!(State::Standby, sim.ll().state(SLOT));

    assert_eq!(RadioState::Idle, sim.radio().state());

    assert_eq!(8, sim.stack().pool().free_count());

    // stopping twice is fine
    sim.ll_mut().stop_advertising(SLOT).unwrap();

    let mut sim = Sim::new(1, 1);

    assert_eq!(Err(LlError::NoBuffer), sim.ll_mut().advertise(SLOT, params));

    assert_eq!(State::Standby, sim.ll().state(SLOT));

    let mut too_large = AdvParams::new(ADV_ADDRESS, INTERVAL);

    assert_eq!(Err(LlError::InvalidAdvData(32)), too_large.set_adv_data(&[0; 32]));
}
