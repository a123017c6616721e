use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::protocol::Command;
use crate::serial::SerialChannel;
use crate::source::ReadingSource;
use crate::task::{FirstTick, TaskHandle, TaskKind};
use crate::{EventSink, Notification, Reading};

/// Forwards readings from a source to the valve controller.
pub struct SensorPoller {
    source: Arc<dyn ReadingSource>,
    endpoint: String,
    channel: Arc<SerialChannel>,
    value_divisor: f64,
    sink: EventSink,
}

impl SensorPoller {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        endpoint: String,
        channel: Arc<SerialChannel>,
        value_divisor: f64,
        sink: EventSink,
    ) -> SensorPoller {
        SensorPoller {
            source,
            endpoint,
            channel,
            value_divisor,
            sink,
        }
    }

    /// Fetches one reading and sends it to the device. The reading is
    /// published as soon as it has been fetched, i.e. even if sending fails.
    pub fn poll_once(&self) -> Result<Reading, Error> {
        let Some(reading) = self.source.fetch(&self.endpoint) else {
            return Err(Error::SourceUnavailable {
                endpoint: self.endpoint.clone(),
            });
        };
        debug!("polled {reading:?}");
        self.sink.publish(&Notification::Reading(reading.clone()));

        let command = Command::sensor_reading(reading.value, self.value_divisor).to_wire();
        self.channel
            .write(&command)
            .map_err(Error::SerialWriteFault)?;
        self.sink.publish(&Notification::CommandSent(command));
        Ok(reading)
    }

    pub fn tick(&self) {
        if let Err(e) = self.poll_once() {
            self.sink.error(TaskKind::Poller, e);
        }
    }

    /// Starts polling: once immediately, then every interval.
    pub fn spawn(self, interval: Duration) -> Result<TaskHandle, Error> {
        TaskHandle::spawn_periodic(TaskKind::Poller, interval, FirstTick::Immediate, move || {
            self.tick()
        })
    }
}
