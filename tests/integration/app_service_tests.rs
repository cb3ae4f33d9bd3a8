//! AppService pipeline: queue messages → engines → relays, audio, events.

use aquamon::app::commands::AppCommand;
use aquamon::app::events::AppEvent;
use aquamon::app::ports::Relay;
use aquamon::app::service::AppService;
use aquamon::codec::{Quantity, Reading};
use aquamon::config::{EndpointId, PumpId, SystemConfig};
use aquamon::control::alarm::AlarmLevel;
use aquamon::drivers::flash::FlashTarget;
use aquamon::events::{core_queue, CoreMsg};

use crate::mock_hw::{HwCall, ManualClock, MemoryStore, MockHardware, RecordingSink};

const A: EndpointId = EndpointId('A');

fn make_app(config: SystemConfig) -> (AppService, MockHardware, RecordingSink) {
    let mut app = AppService::new(config, 0);
    let mut hw = MockHardware::new();
    let mut sink = RecordingSink::new();
    app.start(&mut hw, &mut sink);
    (app, hw, sink)
}

fn level(app: &mut AppService, hw: &mut MockHardware, sink: &mut RecordingSink, raw: &str, now: u64) {
    app.handle(
        CoreMsg::Readings {
            endpoint: A,
            readings: vec![Reading::from_reply(Quantity::Level, raw)],
        },
        now,
        hw,
        sink,
    );
}

#[test]
fn start_drives_every_relay_off() {
    let (_app, hw, sink) = make_app(SystemConfig::default());
    assert_eq!(hw.calls.len(), 3);
    assert!(hw.calls.iter().all(|c| matches!(c, HwCall::Relay { on: false, .. })));
    assert!(matches!(sink.events.last(), Some(AppEvent::Started)));
}

#[test]
fn hysteresis_drives_pump_and_indicator() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());

    let indicator = FlashTarget::Pump(PumpId::A);

    level(&mut app, &mut hw, &mut sink, "400", 1_000);
    assert!(!hw.relay_on(Relay::Pump(PumpId::A)));
    assert!(!app.is_flashing(indicator));

    level(&mut app, &mut hw, &mut sink, "300", 2_000);
    assert!(hw.relay_on(Relay::Pump(PumpId::A)));
    assert!(hw.relay_on(Relay::AnyPump));
    assert!(app.is_flashing(indicator), "auto top-up flashes the pump indicator");

    level(&mut app, &mut hw, &mut sink, "340", 3_000);
    assert!(!hw.relay_on(Relay::Pump(PumpId::A)));
    assert!(!hw.relay_on(Relay::AnyPump));
    assert!(!app.is_flashing(indicator));
    assert!(app.pump_state(PumpId::A).auto, "automatic stop keeps auto mode");
}

#[test]
fn manual_off_disables_auto() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    level(&mut app, &mut hw, &mut sink, "300", 0);
    assert!(app.pump_state(PumpId::A).output);

    app.handle_command(AppCommand::TogglePump(PumpId::A), 10, &mut hw, &mut sink);
    assert!(!app.pump_state(PumpId::A).output);
    assert!(!app.pump_state(PumpId::A).auto);
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::AutoModeChanged { auto: false, .. })),
        1
    );

    level(&mut app, &mut hw, &mut sink, "290", 20);
    assert!(!app.pump_state(PumpId::A).output, "low level must not restart a manual pump");
}

#[test]
fn invalid_level_makes_no_decision() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    let before = hw.calls.len();
    level(&mut app, &mut hw, &mut sink, "ERR", 0);
    level(&mut app, &mut hw, &mut sink, "3.1.4", 0);
    assert_eq!(hw.calls.len(), before);
    assert!(!app.pump_state(PumpId::A).output);
}

#[test]
fn tare_offset_shifts_control_decisions() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    app.handle_command(
        AppCommand::ApplyTare {
            endpoint: A,
            raw: Some(10.0),
        },
        0,
        &mut hw,
        &mut sink,
    );
    // 325 - 10 = 315 → at the on threshold.
    level(&mut app, &mut hw, &mut sink, "325", 10);
    assert!(app.pump_state(PumpId::A).output);
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AppEvent::Reading { tared: Some(t), .. } if (*t - 315.0).abs() < 1e-9
    )));
}

#[test]
fn relay_failure_is_reported_not_dropped() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    hw.failing = Some(Relay::Pump(PumpId::A));
    level(&mut app, &mut hw, &mut sink, "300", 0);
    assert!(app.pump_state(PumpId::A).output, "logical state is kept");
    assert_eq!(sink.count(|e| matches!(e, AppEvent::HardwareFault(_))), 1);
}

// ── Alarms ────────────────────────────────────────────────────

fn ph_alarm_config() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    for alarm in &mut cfg.alarms {
        if alarm.quantity == Quantity::Ph {
            alarm.enabled = true;
        }
    }
    cfg
}

fn ph(app: &mut AppService, hw: &mut MockHardware, sink: &mut RecordingSink, raw: &str, now: u64) {
    app.handle(
        CoreMsg::Readings {
            endpoint: EndpointId('D'),
            readings: vec![Reading::from_reply(Quantity::Ph, raw)],
        },
        now,
        hw,
        sink,
    );
}

#[test]
fn ph_sequence_walks_the_alarm_levels() {
    let (mut app, mut hw, mut sink) = make_app(ph_alarm_config());
    let key = (EndpointId('D'), Quantity::Ph);
    let mut seen = Vec::new();
    for (i, raw) in ["7.0", "6.3", "5.9", "6.3"].into_iter().enumerate() {
        ph(&mut app, &mut hw, &mut sink, raw, i as u64 * 3_000);
        seen.push(app.alarm_level(key));
    }
    assert_eq!(
        seen,
        [
            AlarmLevel::Normal,
            AlarmLevel::Approaching,
            AlarmLevel::Critical,
            AlarmLevel::Approaching
        ]
    );
}

#[test]
fn repeated_critical_flashes_and_plays_once() {
    let (mut app, mut hw, mut sink) = make_app(ph_alarm_config());
    ph(&mut app, &mut hw, &mut sink, "5.0", 0);
    ph(&mut app, &mut hw, &mut sink, "5.1", 400);
    ph(&mut app, &mut hw, &mut sink, "4.9", 5_000);

    assert_eq!(hw.plays().len(), 1);
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::AlarmStateChanged(t) if t.to == AlarmLevel::Critical)),
        1
    );
    assert_eq!(sink.count(|e| matches!(e, AppEvent::FlashFrame(_))), 1);
    assert!(app.is_flashing(FlashTarget::Alarm(
        EndpointId('D'),
        Quantity::Ph
    )));
}

#[test]
fn recovery_stops_flash_and_audio() {
    let (mut app, mut hw, mut sink) = make_app(ph_alarm_config());
    ph(&mut app, &mut hw, &mut sink, "5.0", 0);
    ph(&mut app, &mut hw, &mut sink, "7.2", 1_000);
    assert_eq!(hw.calls.last(), Some(&HwCall::StopAudio));
    assert_eq!(sink.count(|e| matches!(e, AppEvent::FlashStopped(_))), 1);
    assert!(matches!(
        sink.events.last(),
        Some(AppEvent::Display { text, .. }) if text == "Connected"
    ));
    assert_eq!(app.pending_timers(), 0);
}

#[test]
fn refused_cue_does_not_leave_the_previous_one_playing() {
    let (mut app, mut hw, mut sink) = make_app(ph_alarm_config());
    let key = (EndpointId('D'), Quantity::Ph);
    ph(&mut app, &mut hw, &mut sink, "5.0", 0);
    ph(&mut app, &mut hw, &mut sink, "6.3", 500);
    // Critical again inside the rate-limit window: no new cue is played.
    ph(&mut app, &mut hw, &mut sink, "5.0", 1_000);

    assert_eq!(app.alarm_level(key), AlarmLevel::Critical);
    let audio = SystemConfig::default().audio;
    assert_eq!(
        hw.plays(),
        [audio.critical_cue.as_path(), audio.approaching_cue.as_path()]
    );
    assert_eq!(hw.calls.last(), Some(&HwCall::StopAudio));
    assert!(app.is_flashing(FlashTarget::Alarm(EndpointId('D'), Quantity::Ph)));
}

#[test]
fn config_update_applies_new_alarm_timing() {
    let (mut app, mut hw, mut sink) = make_app(ph_alarm_config());
    let mut faster = ph_alarm_config();
    faster.timing.audio_min_interval_ms = 100;
    faster.timing.flash_interval_ms = 200;
    app.handle_command(AppCommand::UpdateConfig(Box::new(faster)), 0, &mut hw, &mut sink);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::ConfigRejected(_))), 0);
    assert!(app.auto_save_if_needed(5_000, &MemoryStore::new()));

    ph(&mut app, &mut hw, &mut sink, "5.0", 10_000);
    ph(&mut app, &mut hw, &mut sink, "7.0", 10_100);
    ph(&mut app, &mut hw, &mut sink, "5.0", 10_300);

    assert_eq!(hw.plays().len(), 2, "300 ms apart is outside the new window");
    assert_eq!(app.pending_timers(), 1);
    assert_eq!(app.next_deadline(), Some(10_500), "flash ticks at the new interval");
}

#[test]
fn zero_flash_interval_is_rejected() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    let mut bad = SystemConfig::default();
    bad.timing.flash_interval_ms = 0;
    app.handle_command(AppCommand::UpdateConfig(Box::new(bad)), 0, &mut hw, &mut sink);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::ConfigRejected(_))), 1);
}

// ── Config persistence ────────────────────────────────────────

#[test]
fn auto_save_waits_for_the_delay() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    let store = MemoryStore::new();
    app.handle_command(AppCommand::ClearTare { endpoint: A }, 1_000, &mut hw, &mut sink);
    assert!(!app.auto_save_if_needed(5_999, &store));
    assert!(app.auto_save_if_needed(6_000, &store));
    assert_eq!(store.save_count(), 1);
    assert!(!app.is_config_dirty());
}

#[test]
fn save_command_is_due_immediately() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    let store = MemoryStore::new();
    app.handle_command(AppCommand::SaveConfig, 500, &mut hw, &mut sink);
    assert!(app.auto_save_if_needed(500, &store));
}

#[test]
fn invalid_config_update_is_rejected() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    let mut bad = SystemConfig::default();
    if let Some(ep) = bad.endpoint_mut(A) {
        ep.thresholds = Some(aquamon::config::Thresholds { on: 400.0, off: 300.0 });
    }
    app.handle_command(AppCommand::UpdateConfig(Box::new(bad)), 0, &mut hw, &mut sink);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::ConfigRejected(_))), 1);
    assert!(!app.is_config_dirty());
    assert_eq!(
        app.config().endpoint(A).and_then(|e| e.thresholds).map(|t| t.on),
        Some(315.0)
    );
}

#[test]
fn connected_firmware_is_persisted() {
    let (mut app, mut hw, mut sink) = make_app(SystemConfig::default());
    app.handle(
        CoreMsg::Connected {
            endpoint: A,
            transport: "serial /dev/ttyUSB0".into(),
            firmware: Some("1.4.2".into()),
        },
        0,
        &mut hw,
        &mut sink,
    );
    assert_eq!(
        app.config().endpoint(A).and_then(|e| e.firmware_version.clone()).as_deref(),
        Some("1.4.2")
    );
    assert!(app.is_config_dirty());
}

#[test]
fn run_loop_drains_queue_and_saves_on_shutdown() {
    let (tx, rx) = core_queue();
    let mut app = AppService::new(SystemConfig::default(), 0);
    let mut hw = MockHardware::new();
    let mut sink = RecordingSink::new();
    let store = MemoryStore::new();
    let clock = ManualClock::at(0);

    assert!(tx.send(CoreMsg::Readings {
        endpoint: A,
        readings: vec![Reading::from_reply(Quantity::Level, "300")],
    }));
    assert!(tx.send(CoreMsg::Command(AppCommand::ApplyTare {
        endpoint: A,
        raw: Some(5.0),
    })));
    assert!(tx.send(CoreMsg::Shutdown));

    app.start(&mut hw, &mut sink);
    app.run(&rx, &mut hw, &mut sink, &store, &clock);

    assert!(!hw.relay_on(Relay::Pump(PumpId::A)), "shutdown turns pumps off");
    assert!(!hw.relay_on(Relay::AnyPump));
    assert_eq!(store.save_count(), 1, "dirty config is saved on shutdown");
    assert_eq!(
        store.last().and_then(|c| c.endpoint(A).map(|e| e.tare_offset)),
        Some(-5.0)
    );
}
