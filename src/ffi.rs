extern crate libc;

use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Arc;

use tracing::error;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::{EventSink, HttpCsvSource, Notification, SerialEvent, Supervisor, TaskKind};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValvelinkNotificationKind {
    /// value: the reading, text: "<sensor type> <unit>".
    Reading,
    /// text: the full telemetry line (same for the next two kinds).
    ValveTargetPosition,
    ValvePosition,
    RawLine,
    /// text: the command as written, without terminator.
    CommandSent,
    /// value: the logged value, text: path of the log file.
    Logged,
    TaskStarted,
    TaskStopped,
    /// text: description of the error.
    Error,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValvelinkTask {
    None,
    Poller,
    Reader,
    Logger,
}

impl From<TaskKind> for ValvelinkTask {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Poller => ValvelinkTask::Poller,
            TaskKind::Reader => ValvelinkTask::Reader,
            TaskKind::Logger => ValvelinkTask::Logger,
        }
    }
}

#[repr(C)]
pub struct ValvelinkNotification {
    pub kind: ValvelinkNotificationKind,
    pub task: ValvelinkTask,
    pub value: f64,
    /// Only valid for the duration of the callback. Never NULL.
    pub text: *const libc::c_char,
}

/// FFI wrapper for Supervisor.
pub struct ValvelinkSupervisor {
    supervisor: Supervisor,
}

// A (C) void* wrapper, which can be (un)safely transmitted across threads.
struct FFICallbackDataHandle(*mut std::ffi::c_void);
unsafe impl Send for FFICallbackDataHandle {}
unsafe impl Sync for FFICallbackDataHandle {}

impl FFICallbackDataHandle {
    fn get(&self) -> *mut std::ffi::c_void {
        self.0
    }
}

// Telemetry is arbitrary device output, so may contain NULs.
fn to_cstring(text: &str) -> CString {
    CString::new(text.replace('\0', "\u{fffd}")).unwrap_or_default()
}

fn from_raw(raw: *const libc::c_char) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    let cstr = unsafe { CStr::from_ptr(raw) };
    Some(String::from_utf8_lossy(cstr.to_bytes()).to_string())
}

/// Flattens a notification into (kind, task, value, text).
fn flatten(
    notification: &Notification,
) -> (ValvelinkNotificationKind, ValvelinkTask, f64, String) {
    use ValvelinkNotificationKind as Kind;
    match notification {
        Notification::Reading(reading) => (
            Kind::Reading,
            ValvelinkTask::Poller,
            reading.value,
            format!("{} {}", reading.sensor_type, reading.unit),
        ),
        Notification::Serial(event) => {
            let kind = match event {
                SerialEvent::ValveTargetPosition(_) => Kind::ValveTargetPosition,
                SerialEvent::ValvePosition(_) => Kind::ValvePosition,
                SerialEvent::RawLine(_) => Kind::RawLine,
            };
            (kind, ValvelinkTask::Reader, 0.0, event.text().to_string())
        }
        Notification::CommandSent(command) => {
            (Kind::CommandSent, ValvelinkTask::None, 0.0, command.clone())
        }
        Notification::Logged { path, record } => (
            Kind::Logged,
            ValvelinkTask::Logger,
            record.value,
            path.display().to_string(),
        ),
        Notification::TaskStarted(task) => {
            (Kind::TaskStarted, (*task).into(), 0.0, task.to_string())
        }
        Notification::TaskStopped(task) => {
            (Kind::TaskStopped, (*task).into(), 0.0, task.to_string())
        }
        Notification::Error { task, error } => {
            (Kind::Error, (*task).into(), 0.0, error.to_string())
        }
    }
}

impl ValvelinkSupervisor {
    /// Connects to the valve controller, and starts reading its telemetry.
    /// port_raw and config_path_raw may be NULL, in which case the configured
    /// port (or first available port), and valvelink.toml in the working
    /// directory are used. Returns NULL on failure; details are logged.
    /// Non-rust callers must call valvelink_supervisor_free to release the
    /// returned supervisor.
    #[export_name = "valvelink_supervisor_connect"]
    pub extern "C" fn connect(
        port_raw: *const libc::c_char,
        config_path_raw: *const libc::c_char,
        callback: extern "C" fn(&ValvelinkNotification, *mut std::ffi::c_void) -> (),
        callback_data: *mut std::ffi::c_void,
    ) -> *mut ValvelinkSupervisor {
        let config_path =
            from_raw(config_path_raw).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match Config::load(Path::new(&config_path)) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return std::ptr::null_mut();
            }
        };
        if let Some(port) = from_raw(port_raw) {
            config.serial.port = Some(port);
        }
        let source = match HttpCsvSource::new(&config.source) {
            Ok(source) => source,
            Err(e) => {
                error!("{e}");
                return std::ptr::null_mut();
            }
        };

        let callback_data = FFICallbackDataHandle(callback_data);
        let sink = EventSink::new(move |notification: &Notification| {
            let (kind, task, value, text) = flatten(notification);
            let text = to_cstring(&text);
            let notification = ValvelinkNotification {
                kind,
                task,
                value,
                text: text.as_ptr(),
            };
            callback(&notification, callback_data.get());
        });
        match Supervisor::connect(config, Arc::new(source), sink) {
            Ok(supervisor) => Box::into_raw(Box::new(ValvelinkSupervisor { supervisor })),
            Err(e) => {
                error!("{e}");
                std::ptr::null_mut()
            }
        }
    }

    /// Returns true if polling is running (whether or not it was already).
    #[export_name = "valvelink_supervisor_start_polling"]
    pub extern "C" fn start_polling(&self) -> bool {
        match self.supervisor.start_polling() {
            Ok(_) => true,
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    #[export_name = "valvelink_supervisor_stop_polling"]
    pub extern "C" fn stop_polling(&self) {
        self.supervisor.stop_polling();
    }

    #[export_name = "valvelink_supervisor_is_polling"]
    pub extern "C" fn is_polling(&self) -> bool {
        self.supervisor.is_polling()
    }

    /// Returns true if logging is running (whether or not it was already).
    #[export_name = "valvelink_supervisor_start_logging"]
    pub extern "C" fn start_logging(&self) -> bool {
        match self.supervisor.start_logging() {
            Ok(_) => true,
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    #[export_name = "valvelink_supervisor_stop_logging"]
    pub extern "C" fn stop_logging(&self) {
        self.supervisor.stop_logging();
    }

    #[export_name = "valvelink_supervisor_is_logging"]
    pub extern "C" fn is_logging(&self) -> bool {
        self.supervisor.is_logging()
    }

    /// Sends a verbatim command (without terminator). Returns false if the
    /// command could not be written.
    #[export_name = "valvelink_supervisor_send_command"]
    pub extern "C" fn send_command(&self, command_raw: *const libc::c_char) -> bool {
        let Some(command) = from_raw(command_raw) else {
            return false;
        };
        match self.supervisor.send_raw(&command) {
            Ok(()) => true,
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    #[export_name = "valvelink_supervisor_force_sweep"]
    pub extern "C" fn force_sweep(&self) -> bool {
        match self.supervisor.force_sweep() {
            Ok(()) => true,
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    /// Stops all tasks, closes the connection, and releases the supervisor.
    #[export_name = "valvelink_supervisor_free"]
    pub extern "C" fn free(&mut self) {
        unsafe {
            drop(Box::from_raw(self));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::reading;
    use crate::{Error, LogRecord};
    use std::path::PathBuf;

    #[test]
    fn test_flatten() {
        struct TestCase<'a> {
            name: &'a str,
            input: Notification,
            expected_result: (ValvelinkNotificationKind, ValvelinkTask, f64, &'a str),
        }
        let record = LogRecord {
            timestamp: time::OffsetDateTime::UNIX_EPOCH,
            value: 20.5,
            unit: "degC".to_string(),
        };
        let tests = [
            TestCase {
                name: "Reading",
                input: Notification::Reading(reading("Oxygen", 8.25, "mg/l")),
                expected_result: (
                    ValvelinkNotificationKind::Reading,
                    ValvelinkTask::Poller,
                    8.25,
                    "Oxygen mg/l",
                ),
            },
            TestCase {
                name: "TargetPosition",
                input: Notification::Serial(SerialEvent::ValveTargetPosition(
                    "Valve calc newPosition: 50".to_string(),
                )),
                expected_result: (
                    ValvelinkNotificationKind::ValveTargetPosition,
                    ValvelinkTask::Reader,
                    0.0,
                    "Valve calc newPosition: 50",
                ),
            },
            TestCase {
                name: "Logged",
                input: Notification::Logged {
                    path: PathBuf::from("logs/Temperature.csv"),
                    record,
                },
                expected_result: (
                    ValvelinkNotificationKind::Logged,
                    ValvelinkTask::Logger,
                    20.5,
                    "logs/Temperature.csv",
                ),
            },
            TestCase {
                name: "Error",
                input: Notification::Error {
                    task: TaskKind::Poller,
                    error: Error::NoEndpoint,
                },
                expected_result: (
                    ValvelinkNotificationKind::Error,
                    ValvelinkTask::Poller,
                    0.0,
                    "no reading source endpoint configured for polling",
                ),
            },
        ];
        for case in tests {
            let (kind, task, value, text) = flatten(&case.input);
            let (expected_kind, expected_task, expected_value, expected_text) =
                case.expected_result;
            assert_eq!(kind, expected_kind, "{}", case.name);
            assert_eq!(task, expected_task, "{}", case.name);
            assert_eq!(value, expected_value, "{}", case.name);
            assert_eq!(text, expected_text, "{}", case.name);
        }
    }

    #[test]
    fn test_to_cstring_strips_nul() {
        assert_eq!(to_cstring("a\0b").to_str(), Ok("a\u{fffd}b"));
        assert!(from_raw(std::ptr::null()).is_none());
        let raw = to_cstring("Force_Sweep");
        assert_eq!(from_raw(raw.as_ptr()).as_deref(), Some("Force_Sweep"));
    }
}
