/// Commands understood by the valve controller firmware. We don't validate any
/// of these - the firmware is the authority on what's in range, and manual
/// command entry bypasses this enum entirely anyway (see
/// Supervisor::send_raw).
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Report the latest dissolved oxygen reading.
    SensorReadingDo(f64),
    /// Set the dissolved oxygen target.
    TargetDo(f64),
    ForceSweep,
    /// Move the valve by a (signed) number of steps.
    MoveValve(i64),
    /// Calibrate the valve's minimum (floor) position.
    SetValveMinPosition(i64),
}

impl Command {
    /// Renders the command as sent on the wire, minus the trailing newline
    /// (which SerialChannel appends).
    pub fn to_wire(&self) -> String {
        match self {
            Command::SensorReadingDo(value) => {
                format!("Sensor_Reading_DO {}", format_float(*value))
            }
            Command::TargetDo(value) => format!("Target_DO {}", format_float(*value)),
            Command::ForceSweep => "Force_Sweep".to_string(),
            Command::MoveValve(steps) => format!("Move_Valve {steps}"),
            Command::SetValveMinPosition(position) => {
                format!("Set_Valve_Min_Position {position}")
            }
        }
    }

    /// Builds the command reporting a sensor value. The firmware has been
    /// deployed both with raw values and with values divided by 10, hence the
    /// divisor is configuration and not a constant.
    pub fn sensor_reading(value: f64, divisor: f64) -> Command {
        Command::SensorReadingDo(value / divisor)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Formats a value for the wire (and the logs). Integral values keep a
/// trailing ".0", which is what the firmware has always been sent.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub const VALVE_TARGET_POSITION_PREFIX: &str = "Valve calc newPosition:";
pub const VALVE_POSITION_PREFIX: &str = "Valve Position:";

/// A line of telemetry sent by the controller. Every variant carries the
/// complete (trimmed) line, prefix included.
#[derive(Clone, Debug, PartialEq)]
pub enum SerialEvent {
    /// The position the controller has decided to move the valve to.
    ValveTargetPosition(String),
    /// The valve's current position.
    ValvePosition(String),
    /// Anything else (debug output, command echoes, etc.).
    RawLine(String),
}

impl SerialEvent {
    pub fn text(&self) -> &str {
        match self {
            SerialEvent::ValveTargetPosition(text)
            | SerialEvent::ValvePosition(text)
            | SerialEvent::RawLine(text) => text,
        }
    }
}

/// Classify one line of telemetry. Prefixes are checked most-specific first;
/// the current prefixes don't overlap, but that ordering must be retained if
/// ever they do.
pub fn classify_line(line: &str) -> SerialEvent {
    let line = line.trim();
    if line.starts_with(VALVE_TARGET_POSITION_PREFIX) {
        SerialEvent::ValveTargetPosition(line.to_string())
    } else if line.starts_with(VALVE_POSITION_PREFIX) {
        SerialEvent::ValvePosition(line.to_string())
    } else {
        SerialEvent::RawLine(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wire() {
        struct TestCase<'a> {
            name: &'a str,
            input: Command,
            expected_result: &'a str,
        }
        let tests = [
            TestCase {
                name: "SensorReading",
                input: Command::SensorReadingDo(2.137),
                expected_result: "Sensor_Reading_DO 2.137",
            },
            TestCase {
                name: "SensorReadingExponent",
                input: Command::SensorReadingDo(1.5e-3),
                expected_result: "Sensor_Reading_DO 0.0015",
            },
            TestCase {
                name: "SensorReadingIntegral",
                input: Command::SensorReadingDo(7.0),
                expected_result: "Sensor_Reading_DO 7.0",
            },
            TestCase {
                name: "TargetIntegral",
                input: Command::TargetDo(-3.0),
                expected_result: "Target_DO -3.0",
            },
            TestCase {
                name: "Target",
                input: Command::TargetDo(7.5),
                expected_result: "Target_DO 7.5",
            },
            TestCase {
                name: "ForceSweep",
                input: Command::ForceSweep,
                expected_result: "Force_Sweep",
            },
            TestCase {
                name: "MoveValveNegative",
                input: Command::MoveValve(-200),
                expected_result: "Move_Valve -200",
            },
            TestCase {
                name: "SetValveMinPosition",
                input: Command::SetValveMinPosition(40),
                expected_result: "Set_Valve_Min_Position 40",
            },
        ];
        for case in tests {
            let got = case.input.to_wire();
            assert_eq!(
                got, case.expected_result,
                "{}: got={got:?}, want={:?}",
                case.name, case.expected_result
            );
        }
    }

    #[test]
    fn test_sensor_reading_divisor() {
        assert_eq!(
            Command::sensor_reading(2.137, 1.0),
            Command::SensorReadingDo(2.137)
        );
        assert_eq!(
            Command::sensor_reading(2.137, 10.0),
            Command::SensorReadingDo(2.137 / 10.0)
        );
        assert_eq!(
            Command::sensor_reading(85.0, 10.0).to_wire(),
            "Sensor_Reading_DO 8.5"
        );
    }

    #[test]
    fn test_classify_line() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a str,
            expected_result: SerialEvent,
        }
        let tests = [
            TestCase {
                name: "ValvePosition",
                input: "Valve Position: 42",
                expected_result: SerialEvent::ValvePosition("Valve Position: 42".to_string()),
            },
            TestCase {
                name: "ValveTargetPosition",
                input: "Valve calc newPosition: 120",
                expected_result: SerialEvent::ValveTargetPosition(
                    "Valve calc newPosition: 120".to_string(),
                ),
            },
            TestCase {
                name: "TrailingCarriageReturn",
                input: "Valve Position: 7\r",
                expected_result: SerialEvent::ValvePosition("Valve Position: 7".to_string()),
            },
            TestCase {
                name: "Raw",
                input: "hello",
                expected_result: SerialEvent::RawLine("hello".to_string()),
            },
            TestCase {
                // Prefixes are case sensitive, as sent by the firmware.
                name: "WrongCase",
                input: "valve position: 42",
                expected_result: SerialEvent::RawLine("valve position: 42".to_string()),
            },
            TestCase {
                name: "PrefixNotAtStart",
                input: "DBG Valve Position: 42",
                expected_result: SerialEvent::RawLine("DBG Valve Position: 42".to_string()),
            },
            TestCase {
                name: "PrefixOnly",
                input: "Valve calc newPosition:",
                expected_result: SerialEvent::ValveTargetPosition(
                    "Valve calc newPosition:".to_string(),
                ),
            },
        ];
        for case in tests {
            let got = classify_line(case.input);
            assert_eq!(
                got, case.expected_result,
                "{}: got={got:?}, want={:?}",
                case.name, case.expected_result
            );
        }
    }

    #[test]
    fn test_target_position_never_raw() {
        for suffix in ["", " 0", " -12", " garbage", "Valve Position: 1"] {
            let line = format!("{VALVE_TARGET_POSITION_PREFIX}{suffix}");
            assert!(
                matches!(classify_line(&line), SerialEvent::ValveTargetPosition(_)),
                "{line} must be a target position"
            );
        }
    }
}
