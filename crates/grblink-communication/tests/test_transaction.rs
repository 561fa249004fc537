use grblink_communication::firmware::grbl::error_decoder;
use grblink_communication::{
    Command, ControllerConfig, Expect, GrblController, GrblLink, SerialLink, Transport,
};
use grblink_core::{ControllerError, Error};
use std::collections::VecDeque;
use std::time::Duration;

// Transport that replays a fixed script of incoming lines
struct ScriptedTransport {
    incoming: VecDeque<String>,
    written: Vec<u8>,
    estop: bool,
    flushes: u32,
    closed: bool,
}

impl ScriptedTransport {
    fn new(lines: &[&str]) -> Self {
        Self {
            incoming: lines.iter().map(|l| l.to_string()).collect(),
            written: Vec::new(),
            estop: false,
            flushes: 0,
            closed: false,
        }
    }

    fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written).to_string()
    }
}

impl Transport for ScriptedTransport {
    fn read_line(&mut self, _timeout: Duration) -> grblink_core::Result<Option<String>> {
        Ok(self.incoming.pop_front())
    }

    fn write(&mut self, data: &[u8]) -> grblink_core::Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn flush_input_discard(&mut self) -> grblink_core::Result<()> {
        self.flushes += 1;
        self.incoming.clear();
        if self.estop {
            return Err(ControllerError::EmergencyStop {
                raw: "[MSG:Estop is activated!]".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(20)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> grblink_core::Result<()> {
        self.closed = true;
        Ok(())
    }
}

fn link(lines: &[&str]) -> SerialLink<ScriptedTransport> {
    SerialLink::new(ScriptedTransport::new(lines))
}

#[test]
fn test_send_collects_data_until_ok() {
    let mut link = link(&["$0=10", "", "$1=25", "ok"]);
    let lines = link.send(&Command::new("$$")).unwrap();
    assert_eq!(lines, vec!["$0=10", "$1=25"]);
    assert_eq!(link.transport().written_text(), "$$\r");
}

#[test]
fn test_send_error_reply() {
    let mut link = link(&["error:5"]);
    let err = link.send(&Command::new("$H")).unwrap_err();
    match err {
        Error::Controller(ControllerError::Protocol {
            command,
            code,
            message,
        }) => {
            assert_eq!(command, "$H");
            assert_eq!(code, 5);
            assert_eq!(message, error_decoder::describe_error(5));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_send_times_out_without_terminator() {
    let mut link = link(&["$0=10"]);
    let err = link.send(&Command::new("$$")).unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_transient());
}

#[test]
fn test_expected_line_count_enforced() {
    let mut link = link(&["[GC:G0 G54]", "[GC:G1]", "ok"]);
    let err = link
        .send(&Command::new("$G").bracketed().expect(Expect::ONE))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::MalformedResponse { .. })
    ));
}

#[test]
fn test_bracketed_helpers() {
    let mut link = link(&[
        "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]",
        "ok",
        "[VER:1.1f.20170801:]",
        "[OPT:V,15,128]",
        "ok",
    ]);
    assert_eq!(
        link.parser_state().unwrap(),
        "GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0"
    );
    assert_eq!(
        link.build_info().unwrap(),
        vec!["VER:1.1f.20170801:", "OPT:V,15,128"]
    );
    assert_eq!(link.transport().written_text(), "$G\r$I\r");
}

#[test]
fn test_startup_lines_are_not_bracketed() {
    let mut link = link(&["$N0=G21 G90", "$N1=", "ok"]);
    assert_eq!(link.startup_lines().unwrap(), vec!["$N0=G21 G90", "$N1="]);
    assert_eq!(link.transport().written_text(), "$N\r");
}

#[test]
fn test_bracketed_rejects_bare_line() {
    let mut link = link(&["G54:0.000,0.000,0.000", "ok"]);
    assert!(link.coordinate_systems().is_err());
}

#[test]
fn test_query_status() {
    let mut link = link(&["<Idle|MPos:1.000,2.000,3.000|FS:0,0>"]);
    assert_eq!(
        link.query_status().unwrap(),
        "Idle|MPos:1.000,2.000,3.000|FS:0,0"
    );
    assert_eq!(link.transport().written, b"?");
}

#[test]
fn test_query_status_rejects_unframed_reply() {
    let mut link = link(&["Idle|MPos:1.000,2.000,3.000"]);
    let err = link.query_status().unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::MalformedResponse { .. })
    ));
}

#[test]
fn test_in_reset_probe() {
    let mut awake = link(&["<Idle|MPos:0.000,0.000,0.000|FS:0,0>"]);
    assert!(!awake.in_reset().unwrap());

    let mut silent = link(&[]);
    assert!(silent.in_reset().unwrap());

    let mut garbled = link(&["<>"]);
    assert!(garbled.in_reset().unwrap());
}

#[test]
fn test_reset_recover_finds_banner() {
    let mut link = link(&["", "garbage", "Grbl 1.1f ['$' for help]"]);
    link.reset_recover().unwrap();
}

#[test]
fn test_reset_recover_silent_controller() {
    let mut link = link(&[]);
    let err = link.reset_recover().unwrap_err();
    assert!(err.is_comms_critical());
}

#[test]
fn test_reset_recover_without_banner() {
    let mut link = link(&["junk", "more junk"]);
    let err = link.reset_recover().unwrap_err();
    assert!(err.is_comms_critical());
    assert!(err.to_string().contains("banner"));
}

#[test]
fn test_flush_reports_emergency_stop() {
    let mut transport = ScriptedTransport::new(&["[MSG:Estop is activated!]"]);
    transport.estop = true;
    let mut link = SerialLink::new(transport);
    let err = link.flush().unwrap_err();
    assert!(err.is_emergency_stop());
    assert!(err.is_fatal());
    assert_eq!(link.transport().flushes, 1);
}

#[test]
fn test_closed_link_refuses_everything() {
    let mut link = link(&["ok"]);
    link.close().unwrap();
    assert!(link.transport().closed);
    assert!(matches!(
        link.send(&Command::new("$X")).unwrap_err(),
        Error::Controller(ControllerError::Closed)
    ));
    assert!(link.query_status().is_err());
    assert!(link.cancel_jog().is_err());
    link.close().unwrap();
}

#[test]
fn test_home_alarm_is_homing_failure() {
    let mut link = link(&["ALARM:9", "ok"]);
    let err = link.home().unwrap_err();
    assert!(err.is_homing_failure());
    assert!(err.to_string().contains("limit switch"));
}

#[test]
fn test_home_success() {
    let mut link = link(&["ok"]);
    link.home().unwrap();
    assert_eq!(link.transport().written_text(), "$H\r");
}

#[test]
fn test_jog_wire_format() {
    let mut link = link(&["ok"]);
    link.jog("G90 X1.000 F1000").unwrap();
    assert_eq!(link.transport().written_text(), "$J=G90 X1.000 F1000\r");
}

#[test]
fn test_jog_with_data_is_malformed() {
    let mut link = link(&["[MSG:unexpected]", "ok"]);
    assert!(link.jog("G90 X1.000 F1000").is_err());
}

#[test]
fn test_realtime_bytes() {
    let mut link = link(&[]);
    link.cancel_jog().unwrap();
    link.resume().unwrap();
    link.feed_hold().unwrap();
    link.soft_reset().unwrap();
    assert_eq!(link.transport().written, vec![0x85, b'~', b'!', 0x18]);
}

#[test]
fn test_controller_over_serial_link() {
    let link = link(&["<Idle|MPos:4.000,5.000,6.000|FS:0,0>"]);
    let config = ControllerConfig {
        probe_reset: false,
        ..ControllerConfig::default()
    };
    let controller = GrblController::new(Box::new(link), config).unwrap();
    assert_eq!(controller.name(), "scripted");
    let status = controller.qstatus().unwrap();
    assert!(status.is_idle());
    assert_eq!(status.mpos.get(grblink_core::Axis::Y), Some(5.0));
}
