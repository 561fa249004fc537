use grblink_communication::{
    ControllerConfig, GrblController, HomingMode, HomingOutcome, RelativeStrategy,
    SimulatedLink, SimulatedState, SimulatorConfig, SimulatorHandle, StatusFault,
};
use grblink_core::{Axis, AxisPosition, ControllerError, Error, MetadataRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        cancel_timeout: Duration::from_millis(30),
        stop_timeout: Duration::from_millis(200),
        idle_poll_interval: Duration::from_millis(1),
        idle_timeout: Duration::from_millis(500),
        ..ControllerConfig::default()
    }
}

fn session_with(config: ControllerConfig) -> (GrblController, SimulatorHandle) {
    let link = SimulatedLink::new(SimulatorConfig::instant());
    let handle = link.handle();
    let controller = GrblController::new(Box::new(link), config).unwrap();
    (controller, handle)
}

fn session() -> (GrblController, SimulatorHandle) {
    session_with(fast_config())
}

#[test]
fn test_status_query() {
    let (controller, handle) = session();
    handle.set_position(&AxisPosition::xyz(1.0, -2.5, 3.25));
    let status = controller.qstatus().unwrap();
    assert!(status.is_idle());
    assert_eq!(status.mpos, AxisPosition::xyz(1.0, -2.5, 3.25));
    assert_eq!(status.telemetry_field("FS"), Some("0,0"));
    assert_eq!(controller.position_cache(), Some(status.mpos.clone()));
    assert_eq!(controller.last_status(), Some(status));
}

#[test]
fn test_status_retry_bound() {
    let (controller, handle) = session();
    let before = handle.stats();
    handle.update_faults(|f| f.status_timeouts = StatusFault::Always);

    let err = controller.qstatus().unwrap_err();
    assert!(err.is_comms_critical());
    assert!(matches!(
        err,
        Error::Controller(ControllerError::CommsCritical { attempts: 3, .. })
    ));

    let after = handle.stats();
    assert_eq!(after.status_queries - before.status_queries, 3);
    assert_eq!(after.resumes - before.resumes, 2);
    assert_eq!(after.flushes - before.flushes, 2);
}

#[test]
fn test_status_recovers_after_transient_timeouts() {
    let (controller, handle) = session();
    let before = handle.stats();
    handle.update_faults(|f| f.status_timeouts = StatusFault::Next(2));

    let status = controller.qstatus().unwrap();
    assert!(status.is_idle());
    let after = handle.stats();
    assert_eq!(after.status_queries - before.status_queries, 3);
    assert_eq!(after.resumes - before.resumes, 2);
}

#[test]
fn test_emergency_stop_is_not_retried() {
    let (controller, handle) = session();
    handle.update_faults(|f| {
        f.status_timeouts = StatusFault::Next(1);
        f.emergency_stop = true;
    });
    let before = handle.stats();
    let err = controller.qstatus().unwrap_err();
    assert!(err.is_emergency_stop());
    let after = handle.stats();
    assert_eq!(after.status_queries - before.status_queries, 1);
    assert_eq!(after.flushes - before.flushes, 1);
}

#[test]
fn test_forced_homing_retries_alarms() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.homing_alarms = 2);
    controller.qstatus().unwrap();

    let outcome = controller
        .home(HomingMode {
            lazy: false,
            force: true,
        })
        .unwrap();
    assert_eq!(outcome, HomingOutcome::Homed { attempts: 3 });
    assert_eq!(handle.stats().homing_cycles, 3);
    assert_eq!(handle.state(), SimulatedState::Idle);
    assert_eq!(controller.position_cache(), None);
}

#[test]
fn test_homing_gives_up() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.homing_alarms = 8);
    let err = controller
        .home(HomingMode {
            lazy: false,
            force: true,
        })
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::HomingFailed { attempts: 8, .. })
    ));
    assert_eq!(handle.stats().homing_cycles, 8);
}

#[test]
fn test_lazy_homing_skips_idle_controller() {
    let (controller, handle) = session();
    let outcome = controller.home(HomingMode::default()).unwrap();
    assert_eq!(outcome, HomingOutcome::AlreadyIdle);
    assert_eq!(handle.stats().homing_cycles, 0);
}

#[test]
fn test_homing_from_alarm() {
    let (controller, handle) = session();
    handle.set_state(SimulatedState::Alarm);
    let outcome = controller.home(HomingMode::default()).unwrap();
    assert_eq!(outcome, HomingOutcome::Homed { attempts: 1 });
    assert_eq!(handle.commands(), vec!["$H"]);
}

#[test]
fn test_absolute_move() {
    let (controller, handle) = session();
    controller
        .move_absolute(&AxisPosition::xyz(10.0, 20.0, -1.0), 1500, true)
        .unwrap();
    assert_eq!(
        handle.commands(),
        vec!["$J=G90 X10.000 Y20.000 Z-1.000 F1500"]
    );
    assert_eq!(handle.position(), AxisPosition::xyz(10.0, 20.0, -1.0));
}

#[test]
fn test_move_rejects_bad_parameters() {
    let (controller, handle) = session();
    let err = controller
        .move_absolute(&AxisPosition::new(), 1000, false)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::InvalidParameter { .. })
    ));
    assert!(controller
        .move_absolute(&AxisPosition::xyz(1.0, 1.0, 1.0), 0, false)
        .is_err());
    assert!(handle.commands().is_empty());
}

#[test]
fn test_soft_relative_move_sends_absolute_target() {
    let (controller, handle) = session();
    handle.set_position(&AxisPosition::xyz(1.0, 2.0, 3.0));
    controller
        .move_relative(&AxisPosition::new().with(Axis::X, 0.5), 1000, true)
        .unwrap();
    controller
        .move_relative(&AxisPosition::new().with(Axis::X, 0.5), 1000, true)
        .unwrap();

    let commands = handle.commands();
    assert_eq!(
        commands,
        vec!["$J=G90 X1.500 F1000", "$J=G90 X2.000 F1000"]
    );
    assert!(commands.iter().all(|c| !c.contains("G91")));
    assert_eq!(handle.position(), AxisPosition::xyz(2.0, 2.0, 3.0));
}

#[test]
fn test_soft_relative_move_from_origin() {
    let (controller, handle) = session();
    controller.qstatus().unwrap();
    controller
        .move_relative(&AxisPosition::new().with(Axis::Z, 0.5), 1000, false)
        .unwrap();
    assert_eq!(handle.commands(), vec!["$J=G90 Z0.500 F1000"]);
    assert_eq!(handle.position(), AxisPosition::xyz(0.0, 0.0, 0.5));
}

#[test]
fn test_soft_relative_move_after_jog() {
    let (controller, handle) = session();
    controller.qstatus().unwrap();
    controller
        .jog(&AxisPosition::new().with(Axis::X, 1.0), 500)
        .unwrap();
    controller
        .move_relative(&AxisPosition::new().with(Axis::X, 1.0), 1000, true)
        .unwrap();
    assert_eq!(
        handle.commands(),
        vec!["$J=G91 X1.000 F500", "$J=G90 X2.000 F1000"]
    );
    assert_eq!(handle.position().get(Axis::X), Some(2.0));
}

#[test]
fn test_soft_relative_move_after_non_blocking_move() {
    let (controller, handle) = session();
    controller
        .move_absolute(&AxisPosition::new().with(Axis::Y, 3.0), 1000, false)
        .unwrap();
    controller
        .move_relative(&AxisPosition::new().with(Axis::Y, -1.0), 1000, false)
        .unwrap();
    assert_eq!(handle.commands()[1], "$J=G90 Y2.000 F1000");
    assert_eq!(handle.position().get(Axis::Y), Some(2.0));
}

#[test]
fn test_hard_relative_move() {
    let (controller, handle) = session_with(ControllerConfig {
        relative_strategy: RelativeStrategy::Hard,
        ..fast_config()
    });
    handle.set_position(&AxisPosition::xyz(1.0, 2.0, 3.0));
    controller
        .move_relative(&AxisPosition::new().with(Axis::Z, -0.25), 300, false)
        .unwrap();
    assert_eq!(handle.commands(), vec!["$J=G91 Z-0.250 F300"]);
    assert_eq!(handle.position().get(Axis::Z), Some(2.75));

    controller
        .move_relative_with(
            &AxisPosition::new().with(Axis::Y, 1.0),
            300,
            false,
            RelativeStrategy::Soft,
        )
        .unwrap();
    assert_eq!(handle.commands()[1], "$J=G90 Y3.000 F300");
}

#[test]
fn test_move_retries_after_timeout() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.jog_timeouts = 1);
    controller
        .move_absolute(&AxisPosition::new().with(Axis::X, 4.0), 800, true)
        .unwrap();
    assert_eq!(
        handle.commands(),
        vec!["$J=G90 X4.000 F800", "$J=G90 X4.000 F800"]
    );
    assert_eq!(handle.position().get(Axis::X), Some(4.0));
    assert_eq!(handle.stats().resumes, 1);
}

#[test]
fn test_move_retries_exhausted() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.jog_timeouts = 3);
    let err = controller
        .move_absolute(&AxisPosition::new().with(Axis::X, 4.0), 800, true)
        .unwrap_err();
    assert!(err.is_comms_critical());
    assert_eq!(handle.commands().len(), 3);
}

#[test]
fn test_blocking_move_that_never_settles() {
    let (controller, handle) = session_with(ControllerConfig {
        idle_timeout: Duration::from_millis(20),
        ..fast_config()
    });
    handle.update_faults(|f| f.hold_jogs = true);
    let err = controller
        .move_absolute(&AxisPosition::new().with(Axis::Y, 1.0), 1000, true)
        .unwrap_err();
    assert!(err.is_comms_critical());
    assert_eq!(handle.commands().len(), 3);
}

#[test]
fn test_non_blocking_move_returns_while_moving() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.hold_jogs = true);
    controller
        .move_absolute(&AxisPosition::new().with(Axis::Y, 1.0), 1000, false)
        .unwrap();
    assert_eq!(handle.state(), SimulatedState::Jog);
}

#[test]
fn test_jog_each_axis_in_turn() {
    let (controller, handle) = session();
    controller
        .jog(&AxisPosition::xyz(1.0, -1.0, 0.5), 500)
        .unwrap();
    assert_eq!(
        handle.commands(),
        vec![
            "$J=G91 X1.000 F500",
            "$J=G91 Y-1.000 F500",
            "$J=G91 Z0.500 F500",
        ]
    );
    assert_eq!(handle.position(), AxisPosition::xyz(1.0, -1.0, 0.5));
}

#[test]
fn test_jog_timeout_drops_remaining_axes() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.jog_timeouts = 1);
    controller
        .jog(&AxisPosition::xyz(1.0, 1.0, 1.0), 500)
        .unwrap();
    assert_eq!(handle.commands(), vec!["$J=G91 X1.000 F500"]);
    assert_eq!(handle.position(), AxisPosition::xyz(0.0, 0.0, 0.0));
    assert_eq!(handle.stats().resumes, 1);
}

#[test]
fn test_cancel_jog() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.hold_jogs = true);
    controller
        .jog(&AxisPosition::new().with(Axis::X, 10.0), 100)
        .unwrap();
    assert_eq!(handle.state(), SimulatedState::Jog);

    controller.cancel_jog().unwrap();
    assert_eq!(handle.state(), SimulatedState::Idle);
    let stats = handle.stats();
    assert_eq!(stats.jog_cancels, 1);
    assert_eq!(stats.resumes, 1);
}

#[test]
fn test_stop() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.hold_jogs = true);
    controller
        .jog(&AxisPosition::new().with(Axis::Z, -5.0), 100)
        .unwrap();
    controller.stop().unwrap();
    assert_eq!(handle.state(), SimulatedState::Idle);
}

#[test]
fn test_stop_gives_up_on_stuck_controller() {
    let (controller, handle) = session();
    handle.set_state(SimulatedState::Alarm);
    let started = Instant::now();
    let err = controller.stop().unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_fatal());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(handle.stats().jog_cancels > 0);
}

#[test]
fn test_cancel_jog_exhaustion_is_a_timeout() {
    let (controller, handle) = session();
    handle.set_state(SimulatedState::Alarm);
    let err = controller.cancel_jog().unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_comms_critical());
}

#[test]
fn test_stop_keeps_cancelling_until_idle() {
    let (controller, handle) = session_with(ControllerConfig {
        stop_timeout: Duration::from_secs(5),
        ..fast_config()
    });
    handle.set_state(SimulatedState::Alarm);

    let releaser = {
        let handle = handle.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            handle.set_state(SimulatedState::Idle);
        })
    };
    let started = Instant::now();
    controller.stop().unwrap();
    releaser.join().unwrap();

    // Longer than one full cancel sequence of 3 x 30 ms
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(handle.state(), SimulatedState::Idle);
}

#[test]
fn test_transactions_never_interleave() {
    let (controller, handle) = session();
    handle.update_faults(|f| f.transaction_delay = Duration::from_millis(2));
    let controller = Arc::new(controller);

    thread::scope(|s| {
        for _ in 0..3 {
            let c = controller.clone();
            s.spawn(move || {
                for _ in 0..3 {
                    c.settings().unwrap();
                    c.qstatus().unwrap();
                }
            });
        }
    });

    let wire = handle.wire();
    let mut in_flight: Option<&str> = None;
    for entry in &wire {
        if let Some(tx) = entry.strip_prefix("tx:") {
            assert!(
                in_flight.is_none(),
                "'{}' sent while '{}' was in flight",
                tx,
                in_flight.unwrap_or_default()
            );
            if tx != "?" {
                in_flight = Some(tx);
            }
        } else if entry == "rx:ok" || entry.starts_with("rx:error") {
            in_flight = None;
        }
    }
    assert_eq!(
        wire.iter().filter(|e| e.as_str() == "tx:$$").count(),
        9
    );
}

#[test]
fn test_reset_probe_on_open() {
    let link = SimulatedLink::new(SimulatorConfig {
        latency: Duration::ZERO,
        reset_settle: Duration::ZERO,
        ..SimulatorConfig::default()
    });
    let handle = link.handle();
    assert_eq!(handle.state(), SimulatedState::Reset);

    let controller = GrblController::new(Box::new(link), fast_config()).unwrap();
    assert_eq!(handle.state(), SimulatedState::Idle);
    assert!(controller.last_status().is_some());
}

#[test]
fn test_without_probe_reset_controller_stays_silent() {
    let link = SimulatedLink::new(SimulatorConfig {
        latency: Duration::ZERO,
        reset_settle: Duration::ZERO,
        ..SimulatorConfig::default()
    });
    let controller = GrblController::new(
        Box::new(link),
        ControllerConfig {
            probe_reset: false,
            ..fast_config()
        },
    )
    .unwrap();
    assert!(controller.qstatus().unwrap_err().is_comms_critical());
}

#[test]
fn test_reset_on_open() {
    let (controller, handle) = session_with(ControllerConfig {
        reset_on_open: true,
        ..fast_config()
    });
    assert_eq!(handle.stats().resets, 1);
    assert_eq!(handle.state(), SimulatedState::Idle);
    controller.reset().unwrap();
    assert_eq!(handle.stats().resets, 2);
}

#[test]
fn test_general_recover() {
    let (controller, handle) = session();
    handle.set_state(SimulatedState::Hold);
    controller.general_recover().unwrap();
    assert_eq!(handle.state(), SimulatedState::Idle);

    handle.update_faults(|f| f.status_timeouts = StatusFault::Always);
    assert!(controller.general_recover().unwrap_err().is_comms_critical());
}

#[test]
fn test_unlock() {
    let (controller, handle) = session();
    handle.set_state(SimulatedState::Alarm);
    controller.unlock().unwrap();
    assert_eq!(handle.state(), SimulatedState::Idle);
}

#[test]
fn test_metadata_round_trip() {
    let (controller, handle) = session();
    assert_eq!(controller.read_metadata().unwrap(), None);

    let record = MetadataRecord::new("SN0042", "MK2");
    controller.write_metadata(&record).unwrap();
    assert_eq!(handle.commands().len(), 2);
    assert!(handle.commands()[0].starts_with("G10 L2 P5 "));
    assert!(handle.commands()[1].starts_with("G10 L2 P6 "));

    assert_eq!(controller.read_metadata().unwrap(), Some(record.clone()));
    assert_eq!(controller.require_metadata().unwrap(), record);
}

#[test]
fn test_metadata_absent() {
    let (controller, _) = session();
    let err = controller.require_metadata().unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::MetadataAbsent)
    ));
}

#[test]
fn test_metadata_rejects_long_fields() {
    let (controller, handle) = session();
    let err = controller
        .write_metadata(&MetadataRecord::new("TOOLONG7", "MK2"))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::InvalidParameter { .. })
    ));
    assert!(handle.commands().is_empty());
}

#[test]
fn test_wcs_offsets() {
    let (controller, _) = session();
    assert_eq!(
        controller.wcs_offsets().unwrap(),
        AxisPosition::xyz(0.0, 0.0, 0.0)
    );
    controller.command("G10 L2 P1 X1.5 Y-2 Z0.25").unwrap();
    assert_eq!(
        controller.wcs_offsets().unwrap(),
        AxisPosition::xyz(1.5, -2.0, 0.25)
    );
}

#[test]
fn test_firmware_queries() {
    let (controller, _) = session();
    let settings = controller.settings().unwrap();
    assert_eq!(settings.len(), 15);
    assert!(settings.homing_enabled());
    assert_eq!(settings.get(110).and_then(|s| s.numeric()), Some(500.0));

    let info = controller.build_info().unwrap();
    assert_eq!(info.version, "1.1f.20170801:");
    assert_eq!(info.option_names().collect::<Vec<_>>(), vec!["VARIABLE_SPINDLE"]);
    assert_eq!(info.rx_buffer, Some(128));

    let startup = controller.startup_lines().unwrap();
    assert_eq!(startup.len(), 2);
    assert_eq!(startup[0].block, "G21 G90");
    assert!(startup[1].is_empty());
    assert!(controller.parser_state().unwrap().starts_with("GC:G0 G54"));
    assert!(controller.help().unwrap().starts_with("HLP:"));
}

#[test]
fn test_run_commands_stops_at_first_error() {
    let (controller, handle) = session();
    let err = controller
        .run_commands(&["G10 L2 P1 X1", "M999", "G10 L2 P2 X2"])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::Protocol { code: 20, .. })
    ));
    assert_eq!(handle.commands(), vec!["G10 L2 P1 X1", "M999"]);
}

#[test]
fn test_status_callback() {
    let (controller, handle) = session();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    controller.set_status_callback(Box::new(move |status| {
        sink.lock().push(status.state.clone());
    }));

    controller.qstatus().unwrap();
    handle.set_state(SimulatedState::Alarm);
    controller.qstatus().unwrap();
    controller.clear_status_callback();
    controller.qstatus().unwrap();

    assert_eq!(*seen.lock(), vec!["Idle".to_string(), "Alarm".to_string()]);
}

#[test]
fn test_stale_callback_id_leaves_newer_callback() {
    let (controller, _) = session();
    let count = Arc::new(Mutex::new(0));
    let old = controller.set_status_callback(Box::new(|_| {}));
    let sink = count.clone();
    let current = controller.set_status_callback(Box::new(move |_| *sink.lock() += 1));

    assert!(!controller.remove_status_callback(old));
    controller.qstatus().unwrap();
    assert_eq!(*count.lock(), 1);

    assert!(controller.remove_status_callback(current));
    controller.qstatus().unwrap();
    assert_eq!(*count.lock(), 1);
}

#[test]
fn test_close() {
    let (controller, handle) = session();
    controller.close().unwrap();
    assert!(controller.is_closed());
    assert!(handle.is_closed());
    assert!(matches!(
        controller.qstatus().unwrap_err(),
        Error::Controller(ControllerError::Closed)
    ));
    controller.close().unwrap();
}

#[test]
fn test_drop_closes_link() {
    let (controller, handle) = session();
    drop(controller);
    assert!(handle.is_closed());
}
