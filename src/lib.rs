extern crate libc;
extern crate serialport;

pub mod config;
pub mod error;
mod ffi;
pub mod logger;
pub mod poller;
pub mod protocol;
pub mod reader;
pub mod serial;
pub mod source;
mod supervisor;
pub mod task;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use config::Config;
pub use error::{Error, SerialError};
pub use logger::LogRecord;
pub use protocol::{Command, SerialEvent};
pub use serial::SerialChannel;
pub use source::{HttpCsvSource, ReadingSource};
pub use supervisor::Supervisor;
pub use task::TaskKind;

/// One sensor reading, as produced by a ReadingSource.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    /// What is being measured (e.g. "Temperature"). Also determines which log
    /// file the reading ends up in.
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Clone, Debug)]
pub enum Notification {
    /// A reading was fetched by the poller (and forwarded to the device).
    Reading(Reading),
    /// A line of telemetry arrived from the device.
    Serial(SerialEvent),
    /// A command was written to the device, either by the poller or manually.
    CommandSent(String),
    /// The logger appended a record to path.
    Logged { path: PathBuf, record: LogRecord },
    TaskStarted(TaskKind),
    TaskStopped(TaskKind),
    /// Something went wrong during one tick of a task. The task itself carries
    /// on regardless, these are purely informational.
    Error { task: TaskKind, error: Error },
}

/// Wraps the (optional) notification callback. Cloning is cheap, every task
/// gets its own copy.
#[derive(Clone)]
pub struct EventSink {
    callback: Option<Arc<dyn Fn(&Notification) + Send + Sync>>,
}

impl EventSink {
    pub fn new(callback: impl Fn(&Notification) + Send + Sync + 'static) -> EventSink {
        EventSink {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn none() -> EventSink {
        EventSink { callback: None }
    }

    pub fn publish(&self, notification: &Notification) {
        if let Some(callback) = &self.callback {
            callback(notification);
        }
    }

    pub fn error(&self, task: TaskKind, error: Error) {
        tracing::warn!("{task}: {error}");
        self.publish(&Notification::Error { task, error });
    }
}

/// Locks a mutex, ignoring poisoning. Every lock in this crate guards state
/// that stays consistent even if a holder panicked (a port handle, a task
/// handle), so there's no reason to propagate the panic.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
