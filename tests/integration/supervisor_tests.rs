//! Discovery, polling and the watchdog against fake endpoints.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use aquamon::codec::{Command, Quantity};
use aquamon::config::{EndpointId, SystemConfig, TransportSelection};
use aquamon::events::{core_queue, CoreMsg};
use aquamon::supervisor::{LinkState, Supervisor};

use crate::mock_hw::{FakeConnector, FakeDevice};

const A: EndpointId = EndpointId('A');

fn only_a() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.endpoints.retain(|e| e.id == A);
    cfg.timing.poll_interval_ms = 10;
    cfg
}

/// Wait for the first message matching `pred`.
fn wait_for(rx: &Receiver<CoreMsg>, pred: impl Fn(&CoreMsg) -> bool) -> Option<CoreMsg> {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if let Ok(msg) = rx.recv_timeout(Duration::from_millis(50)) {
            if pred(&msg) {
                return Some(msg);
            }
        }
    }
    None
}

#[test]
fn serial_discovery_connects_and_polls() {
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyUSB0", FakeDevice::level('A', "320")));
    let (tx, rx) = core_queue();
    let supervisor = Supervisor::new(&only_a(), connector.clone(), tx);

    supervisor.start();

    match wait_for(&rx, |m| matches!(m, CoreMsg::Connected { .. })) {
        Some(CoreMsg::Connected {
            endpoint,
            transport,
            firmware,
        }) => {
            assert_eq!(endpoint, A);
            assert_eq!(transport, "serial /dev/ttyUSB0");
            assert_eq!(firmware.as_deref(), Some("1.2.0"));
        }
        other => panic!("expected Connected, got {other:?}"),
    }

    let Some(CoreMsg::Readings { readings, .. }) = wait_for(&rx, |m| matches!(m, CoreMsg::Readings { .. })) else {
        panic!("no readings");
    };
    let quantities: Vec<_> = readings.iter().map(|r| r.quantity).collect();
    assert_eq!(quantities, [Quantity::Temperature, Quantity::Level]);
    assert_eq!(readings[1].value, Some(320.0));

    let snap = supervisor.snapshot(A).unwrap();
    assert_eq!(snap.state, LinkState::Connected);
    assert!(snap.running);
    supervisor.shutdown();
    assert!(!supervisor.snapshot(A).unwrap().running);
}

#[test]
fn network_failure_falls_back_to_serial() {
    let mut cfg = only_a();
    cfg.endpoints[0].transport = TransportSelection::Network {
        host: "10.0.0.5".into(),
        port: 8888,
    };
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyACM0", FakeDevice::level('A', "300")));
    let (tx, _rx) = core_queue();
    let supervisor = Supervisor::new(&cfg, connector.clone(), tx);

    supervisor.start();
    assert_eq!(connector.network_opens.load(Ordering::Relaxed), 1);
    assert_eq!(
        supervisor.snapshot(A).and_then(|s| s.transport).as_deref(),
        Some("serial /dev/ttyACM0")
    );
    supervisor.shutdown();
}

#[test]
fn network_endpoint_needs_no_serial_scan() {
    let mut cfg = only_a();
    cfg.endpoints[0].transport = TransportSelection::Network {
        host: "10.0.0.5".into(),
        port: 8888,
    };
    let connector = Arc::new(
        FakeConnector::new()
            .with_network("10.0.0.5", 8888, FakeDevice::level('A', "300"))
            .with_serial("/dev/ttyUSB0", FakeDevice::level('A', "300")),
    );
    let (tx, _rx) = core_queue();
    let supervisor = Supervisor::new(&cfg, connector.clone(), tx);

    supervisor.start();
    assert_eq!(connector.serial_opens.load(Ordering::Relaxed), 0);
    assert_eq!(
        supervisor.snapshot(A).and_then(|s| s.transport).as_deref(),
        Some("tcp 10.0.0.5:8888")
    );
    supervisor.shutdown();
}

#[test]
fn wrong_identity_is_not_accepted() {
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyUSB0", FakeDevice::level('Z', "300")));
    let (tx, rx) = core_queue();
    let supervisor = Supervisor::new(&only_a(), connector, tx);

    supervisor.start();
    assert_eq!(supervisor.snapshot(A).unwrap().state, LinkState::Disconnected);
    assert!(matches!(rx.try_recv(), Ok(CoreMsg::Disconnected { endpoint: A })));
}

#[test]
fn watchdog_stops_after_ceiling() {
    // A port that never identifies as A: every attempt opens it once.
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyUSB0", FakeDevice::level('Z', "0")));
    let (tx, rx) = core_queue();
    let cfg = only_a();
    let ceiling = cfg.timing.reconnect_ceiling;
    let supervisor = Supervisor::new(&cfg, connector.clone(), tx);

    supervisor.start();
    let opens_after_start = connector.serial_opens.load(Ordering::Relaxed);

    let attempts: usize = (0..ceiling + 3).map(|_| supervisor.watchdog_tick()).sum();
    assert_eq!(attempts, ceiling as usize);
    assert_eq!(
        connector.serial_opens.load(Ordering::Relaxed) - opens_after_start,
        ceiling as usize
    );

    let snap = supervisor.snapshot(A).unwrap();
    assert_eq!(snap.state, LinkState::Disabled);
    assert_eq!(snap.failures, ceiling);

    let disabled: Vec<_> = rx
        .try_iter()
        .filter_map(|m| match m {
            CoreMsg::Disabled { endpoint, attempts } => Some((endpoint, attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(disabled, [(A, ceiling)]);
}

#[test]
fn reset_revives_a_disabled_endpoint() {
    let connector = Arc::new(FakeConnector::new());
    let (tx, _rx) = core_queue();
    let cfg = only_a();
    let supervisor = Supervisor::new(&cfg, connector.clone(), tx);

    supervisor.start();
    for _ in 0..cfg.timing.reconnect_ceiling {
        supervisor.watchdog_tick();
    }
    assert_eq!(supervisor.snapshot(A).unwrap().state, LinkState::Disabled);

    connector
        .serial
        .lock()
        .unwrap()
        .push(("/dev/ttyUSB1".into(), FakeDevice::level('A', "330")));
    assert_eq!(supervisor.watchdog_tick(), 0, "disabled endpoints are skipped");

    supervisor.reset(A).unwrap();
    let snap = supervisor.snapshot(A).unwrap();
    assert_eq!(snap.state, LinkState::Connected);
    assert_eq!(snap.failures, 0);
    supervisor.shutdown();
}

#[test]
fn dead_link_is_reported_then_reconnected() {
    let device = FakeDevice::level('A', "320");
    let alive = Arc::clone(&device.alive);
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyUSB0", device));
    let (tx, rx) = core_queue();
    let supervisor = Supervisor::new(&only_a(), connector, tx);

    supervisor.start();
    assert!(wait_for(&rx, |m| matches!(m, CoreMsg::Readings { .. })).is_some());

    alive.store(false, Ordering::Release);
    assert!(wait_for(&rx, |m| matches!(m, CoreMsg::Disconnected { endpoint: A })).is_some());
    assert_eq!(supervisor.snapshot(A).unwrap().state, LinkState::Disconnected);

    alive.store(true, Ordering::Release);
    assert_eq!(supervisor.watchdog_tick(), 1);
    assert!(wait_for(&rx, |m| matches!(m, CoreMsg::Connected { endpoint: A, .. })).is_some());
    assert_eq!(supervisor.snapshot(A).unwrap().failures, 0);
    supervisor.shutdown();
}

#[test]
fn ad_hoc_queries_share_the_link_with_the_poller() {
    let device = FakeDevice::level('A', "318.5")
        .reply("RX260", "uptime=42")
        .reply("RX246", "LVL-2");
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyUSB0", device));
    let (tx, _rx) = core_queue();
    let supervisor = Supervisor::new(&only_a(), connector, tx);

    supervisor.start();
    for _ in 0..5 {
        assert_eq!(supervisor.read_level(A).unwrap(), 318.5);
    }
    assert_eq!(supervisor.diagnostics(A).unwrap(), "uptime=42");
    let info = supervisor.info(A).unwrap();
    assert_eq!(info.firmware.as_deref(), Some("1.2.0"));
    assert_eq!(info.model.as_deref(), Some("LVL-2"));
    assert_eq!(info.variant, None);
    supervisor.shutdown();
}

#[test]
fn queries_need_a_connected_endpoint() {
    let (tx, _rx) = core_queue();
    let supervisor = Supervisor::new(&only_a(), Arc::new(FakeConnector::new()), tx);
    assert!(supervisor.query(A, &Command::Diagnostics).is_err());
    assert!(supervisor.query(EndpointId('Q'), &Command::Diagnostics).is_err());
}

#[test]
fn reboot_releases_the_endpoint() {
    let device = FakeDevice::level('A', "320").reply("r", "rebooting");
    let connector = Arc::new(FakeConnector::new().with_serial("/dev/ttyUSB0", device));
    let (tx, rx) = core_queue();
    let supervisor = Supervisor::new(&only_a(), connector.clone(), tx);

    supervisor.start();
    supervisor.reboot(A).unwrap();
    assert_eq!(supervisor.snapshot(A).unwrap().state, LinkState::Disconnected);
    assert!(wait_for(&rx, |m| matches!(m, CoreMsg::Disconnected { endpoint: A })).is_some());
    assert!(connector.sent().iter().any(|line| line == "r"));

    assert_eq!(supervisor.watchdog_tick(), 1);
    assert_eq!(supervisor.snapshot(A).unwrap().state, LinkState::Connected);
    supervisor.shutdown();
}
