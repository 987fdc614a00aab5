use gorm_core::ConnHandle;
use gorm_ll::channel::ChannelMap;
use gorm_tests::central::Central;
use gorm_tests::{Air, Sim};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

const SLOT: ConnHandle = ConnHandle::new(0);

/// Run `events` connection events and return the channel the peripheral listened on in each
fn listened_channels(central: &mut Central, events: usize) -> Vec<Option<u8>> {
    let mut sim = Sim::new(8, 1);

    sim.connect(SLOT, central).unwrap();

    (0..events)
        .map(|_| sim.connection_event(central, |_| Air::Delivered).channel)
        .collect()
}

#[test]
fn every_channel_used() {
    let mut central = Central::new(7);

    let expected = [7, 14, 21, 28, 35, 5, 12, 19, 26, 33, 3]
        .into_iter()
        .map(Some)
        .collect::<Vec<_>>();

    assert_eq!(expected, listened_channels(&mut central, expected.len()));
}

#[test]
fn remapped_channels() {
    let mut central = Central::new(5);

    central.channel_map = ChannelMap::from_channels([1, 5, 9]);

    // unmapped channels 5, 10, 15, and 20 where only 5 is used
    let expected = [5, 5, 1, 9].into_iter().map(Some).collect::<Vec<_>>();

    assert_eq!(expected, listened_channels(&mut central, expected.len()));
}

#[test]
fn follows_the_central() {
    let mut central = Central::new(11);

    central.channel_map = ChannelMap::from_channels([0, 1, 5, 9, 10, 20, 21, 33, 36]);

    let mut sim = Sim::new(8, 1);

    sim.connect(SLOT, &mut central).unwrap();

    for _ in 0..100 {
        let expected = central.channel();

        let report = sim.connection_event(&mut central, |_| Air::Delivered);

        assert_eq!(Some(expected), report.channel);

        assert!(central.channel_map.is_used(expected));
    }
}

#[test]
fn missed_events_keep_hopping() {
    let mut central = Central::new(9);

    central.channel_map = ChannelMap::from_channels(0..20);

    let mut sim = Sim::new(8, 1);

    sim.connect(SLOT, &mut central).unwrap();

    sim.run_events(&mut central, 2);

    // the central stays silent, the peripheral listens anyway
    for _ in 0..10 {
        let expected = central.channel();

        let report = sim.connection_event(&mut central, |_| Air::Lost);

        assert_eq!(Some(expected), report.channel);
    }

    let expected = central.channel();

    assert_eq!(Some(expected), sim.connection_event(&mut central, |_| Air::Delivered).channel);
}

#[quickcheck]
fn channel_selection_algorithm_1(hop: u8, raw_map: u64) -> TestResult {
    let hop = 5 + hop % 12;

    let channel_map = ChannelMap::from_channels((0..37).filter(|channel| raw_map >> channel & 1 != 0));

    if channel_map.count() < 2 {
        return TestResult::discard();
    }

    let mut central = Central::new(hop);

    central.channel_map = channel_map;

    let mut sim = Sim::new(8, 1);

    sim.connect(SLOT, &mut central).unwrap();

    for _ in 0..40 {
        let expected = central.channel();

        let report = sim.connection_event(&mut central, |_| Air::Delivered);

        if report.channel != Some(expected) || !channel_map.is_used(expected) {
            return TestResult::failed();
        }
    }

    TestResult::passed()
}
