//! GRBL Error, Alarm and Setting Decoder
//! Converts numeric error, alarm and setting codes, and `$I` build option
//! letters, to human-readable text

/// Fallback text for codes missing from the error table
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Decode a GRBL 1.1 error code
pub fn decode_error(code: u32) -> Option<&'static str> {
    let text = match code {
        1 => "GCode Command letter was not found",
        2 => "GCode Command value invalid or missing",
        3 => "Grbl '$' not recognized or supported",
        4 => "Negative value for an expected positive value",
        5 => "Homing fail. Homing not enabled in settings",
        6 => "Min step pulse must be greater than 3usec",
        7 => "EEPROM read failed. Default values used",
        8 => "Grbl '$' command Only valid when Idle",
        9 => "GCode commands invalid in alarm or jog state",
        10 => "Soft limits require homing to be enabled",
        11 => "Max characters per line exceeded. Ignored",
        12 => "Grbl '$' setting exceeds the maximum step rate",
        13 => "Safety door opened and door state initiated",
        14 => "Build info or start-up line > EEPROM line length",
        15 => "Jog target exceeds machine travel, ignored",
        16 => "Jog Cmd missing '=' or has prohibited GCode",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported or invalid GCode command",
        21 => "> 1 GCode command in a modal group in block",
        22 => "Feed rate has not yet been set or is undefined",
        23 => "GCode command requires an integer value",
        24 => "> 1 GCode command using axis words found",
        25 => "Repeated GCode word found in block",
        26 => "No axis words found in command block",
        27 => "Line number value is invalid",
        28 => "GCode Cmd missing a required value word",
        29 => "G59.x WCS are not supported",
        30 => "G53 only valid with G0 and G1 motion modes",
        31 => "Unneeded Axis words found in block",
        32 => "G2/G3 arcs need >= 1 in-plane axis word",
        33 => "Motion command target is invalid",
        34 => "Arc radius value is invalid",
        35 => "G2/G3 arcs need >= 1 in-plane offset word",
        36 => "Unused value words found in block",
        37 => "G43.1 offset not assigned to tool length axis",
        38 => "Tool number greater than max value",
        _ => return None,
    };
    Some(text)
}

/// Error text for a code, falling back to [`UNKNOWN_ERROR`]
pub fn describe_error(code: u32) -> &'static str {
    decode_error(code).unwrap_or(UNKNOWN_ERROR)
}

/// Decode a GRBL 1.1 alarm code
pub fn decode_alarm(code: u32) -> Option<&'static str> {
    let text = match code {
        1 => "Hard limit triggered. Position Lost",
        2 => "Soft limit alarm, position kept. Unlock is Safe",
        3 => "Reset while in motion. Position lost",
        4 => "Probe fail. Probe not in expected initial state",
        5 => "Probe fail. Probe did not contact the work",
        6 => "Homing fail. The active homing cycle was reset",
        7 => "Homing fail. Door opened during homing cycle",
        8 => "Homing fail. Pull off failed to clear limit switch",
        9 => "Homing fail. Could not find limit switch",
        _ => return None,
    };
    Some(text)
}

/// Describe a `$n` setting number
pub fn describe_setting(number: u16) -> Option<&'static str> {
    let text = match number {
        0 => "Step pulse, microseconds",
        1 => "Step idle delay, milliseconds",
        2 => "Step port invert, XYZmask*",
        3 => "Direction port invert, XYZmask*",
        4 => "Step enable invert, (0=Disable, 1=Invert)",
        5 => "Limit pins invert, (0=N-Open. 1=N-Close)",
        6 => "Probe pin invert, (0=N-Open. 1=N-Close)",
        10 => "Status report, '?' status.  0=WCS position, 1=Machine position, 2= plan/buffer and WCS position, 3=plan/buffer and Machine position",
        11 => "Junction deviation, mm",
        12 => "Arc tolerance, mm",
        13 => "Report in inches, (0=mm. 1=Inches)**",
        20 => "Soft limits, (0=Disable. 1=Enable, Homing must be enabled)",
        21 => "Hard limits, (0=Disable. 1=Enable)",
        22 => "Homing cycle, (0=Disable. 1=Enable)",
        23 => "Homing direction invert, XYZmask* Sets which corner it homes to",
        24 => "Homing feed, mm/min",
        25 => "Homing seek, mm/min",
        26 => "Homing debounce, milliseconds",
        27 => "Homing pull-off, mm",
        30 => "Max spindle speed, RPM",
        31 => "Min spindle speed, RPM",
        32 => "Laser mode, (0=Off, 1=On)",
        100 => "Number of X steps to move 1mm",
        101 => "Number of Y steps to move 1mm",
        102 => "Number of Z steps to move 1mm",
        110 => "X Max rate, mm/min",
        111 => "Y Max rate, mm/min",
        112 => "Z Max rate, mm/min",
        120 => "X Acceleration, mm/sec^2",
        121 => "Y Acceleration, mm/sec^2",
        122 => "Z Acceleration, mm/sec^2",
        130 => "X Max travel, mm Only for Homing and Soft Limits",
        131 => "Y Max travel, mm Only for Homing and Soft Limits",
        132 => "Z Max travel, mm Only for Homing and Soft Limits",
        _ => return None,
    };
    Some(text)
}

/// Decode one `[OPT:...]` letter from `$I` into its compile-time option name
pub fn decode_build_option(code: char) -> Option<&'static str> {
    let name = match code {
        'V' => "VARIABLE_SPINDLE",
        'N' => "USE_LINE_NUMBERS",
        'M' => "ENABLE_M7",
        'C' => "COREXY",
        'P' => "PARKING_ENABLE",
        'Z' => "HOMING_FORCE_SET_ORIGIN",
        'H' => "HOMING_SINGLE_AXIS_COMMANDS",
        'T' => "LIMITS_TWO_SWITCHES_ON_AXES",
        'A' => "ALLOW_FEED_OVERRIDE_DURING_PROBE_CYCLES",
        'D' => "USE_SPINDLE_DIR_AS_ENABLE_PIN",
        '0' => "SPINDLE_ENABLE_OFF_WITH_ZERO_SPEED",
        'S' => "ENABLE_SOFTWARE_DEBOUNCE",
        'R' => "ENABLE_PARKING_OVERRIDE_CONTROL",
        'L' => "HOMING_INIT_LOCK",
        '+' => "ENABLE_SAFETY_DOOR_INPUT_PIN",
        '*' => "ENABLE_RESTORE_EEPROM_WIPE_ALL",
        '$' => "ENABLE_RESTORE_EEPROM_DEFAULT_SETTINGS",
        '#' => "ENABLE_RESTORE_EEPROM_CLEAR_PARAMETERS",
        'I' => "ENABLE_BUILD_INFO_WRITE_COMMAND",
        'E' => "FORCE_BUFFER_SYNC_DURING_EEPROM_WRITE",
        'W' => "FORCE_BUFFER_SYNC_DURING_WCO_CHANGE",
        '2' => "ENABLE_DUAL_AXIS",
        _ => return None,
    };
    Some(name)
}

/// Format error message with code and description
pub fn format_error(code: u32) -> String {
    format!("error:{} - {}", code, describe_error(code))
}

/// Format alarm message with code and description
pub fn format_alarm(code: u32) -> String {
    format!(
        "ALARM:{} - {}",
        code,
        decode_alarm(code).unwrap_or("unknown alarm")
    )
}
