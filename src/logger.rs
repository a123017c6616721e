use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use crate::error::Error;
use crate::protocol::format_float;
use crate::source::ReadingSource;
use crate::task::{FirstTick, TaskHandle, TaskKind};
use crate::{EventSink, Notification, Reading};

pub const HEADER: &str = "timestamp,value,unit";

#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub timestamp: OffsetDateTime,
    pub value: f64,
    pub unit: String,
}

impl LogRecord {
    /// Timestamps the reading with the current local time. Determining the
    /// local offset can fail (notably on multi-threaded unix processes), in
    /// which case we fall back to UTC rather than not logging at all.
    pub fn now(reading: &Reading) -> LogRecord {
        LogRecord {
            timestamp: OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
            value: reading.value,
            unit: reading.unit.clone(),
        }
    }

    pub fn to_row(&self) -> Result<String, time::error::Format> {
        let format = time::macros::format_description!(
            version = 2,
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        );
        Ok(format!(
            "{},{},{}",
            self.timestamp.format(&format)?,
            format_float(self.value),
            escape_field(&self.unit)
        ))
    }
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Returns the log file for a sensor type. Sensor types come from a remote
/// device, so anything that could escape the log directory is replaced.
pub fn log_path(directory: &Path, sensor_type: &str) -> PathBuf {
    let mut name: String = sensor_type
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if matches!(name.as_str(), "" | "." | "..") {
        name.insert(0, '_');
    }
    directory.join(format!("{name}.csv"))
}

// create_new makes header creation atomic: whoever creates the file writes
// the header, everyone else only ever appends.
fn open_log(path: &Path) -> std::io::Result<(File, bool)> {
    match OpenOptions::new().append(true).create_new(true).open(path) {
        Ok(file) => Ok((file, true)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok((OpenOptions::new().append(true).open(path)?, false))
        }
        Err(e) => Err(e),
    }
}

/// Appends record to the log at path, writing the header first if the file
/// did not yet exist. Data is synced to disk before returning.
pub fn append_record(path: &Path, record: &LogRecord) -> Result<(), Error> {
    let fault = |message: String| Error::LogWriteFault {
        path: path.to_path_buf(),
        message,
    };
    let row = record.to_row().map_err(|e| fault(e.to_string()))?;
    let (mut file, created) = open_log(path).map_err(|e| fault(e.to_string()))?;

    let mut out = String::with_capacity(HEADER.len() + row.len() + 2);
    if created {
        out.push_str(HEADER);
        out.push('\n');
    }
    out.push_str(&row);
    out.push('\n');
    file.write_all(out.as_bytes())
        .and_then(|_| file.flush())
        .and_then(|_| file.sync_data())
        .map_err(|e| fault(e.to_string()))
}

/// Periodically appends readings from every endpoint to per-sensor CSVs.
pub struct DataLogger {
    source: Arc<dyn ReadingSource>,
    endpoints: Vec<String>,
    directory: PathBuf,
    sink: EventSink,
}

impl DataLogger {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        endpoints: Vec<String>,
        directory: PathBuf,
        sink: EventSink,
    ) -> DataLogger {
        DataLogger {
            source,
            endpoints,
            directory,
            sink,
        }
    }

    pub fn log_endpoint(&self, endpoint: &str) -> Result<(PathBuf, LogRecord), Error> {
        let Some(reading) = self.source.fetch(endpoint) else {
            return Err(Error::SourceUnavailable {
                endpoint: endpoint.to_string(),
            });
        };
        let path = log_path(&self.directory, &reading.sensor_type);
        let record = LogRecord::now(&reading);
        append_record(&path, &record)?;
        debug!("logged {record:?} to {}", path.display());
        Ok((path, record))
    }

    /// Logs one reading per endpoint. Endpoints are independent: a failure is
    /// reported, and the remaining endpoints are still logged. Returns the
    /// number of records written.
    pub fn tick(&self) -> usize {
        let mut logged = 0;
        for endpoint in &self.endpoints {
            match self.log_endpoint(endpoint) {
                Ok((path, record)) => {
                    logged += 1;
                    self.sink.publish(&Notification::Logged { path, record });
                }
                Err(e) => self.sink.error(TaskKind::Logger, e),
            }
        }
        logged
    }

    /// Starts logging. The first tick happens one interval from now.
    pub fn spawn(self, interval: Duration) -> Result<TaskHandle, Error> {
        TaskHandle::spawn_periodic(
            TaskKind::Logger,
            interval,
            FirstTick::AfterInterval,
            move || {
                self.tick();
            },
        )
    }
}
