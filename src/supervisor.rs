use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Error;
use crate::logger::DataLogger;
use crate::poller::SensorPoller;
use crate::protocol::Command;
use crate::reader::SerialLineReader;
use crate::serial::{resolve_device, SerialChannel};
use crate::source::ReadingSource;
use crate::task::{TaskKind, TaskSlot};
use crate::{EventSink, Notification};

/// Owns the serial connection and the three tasks sharing it.
///
/// The line reader runs for as long as the supervisor is alive: telemetry
/// should always be visible once connected. Polling and logging are started
/// and stopped on request. All methods take &self, so a supervisor can be
/// shared (e.g. in an Arc) between the UI and whatever else needs it.
///
/// Dropping the supervisor shuts it down, see shutdown().
pub struct Supervisor {
    config: Config,
    channel: Arc<SerialChannel>,
    source: Arc<dyn ReadingSource>,
    sink: EventSink,
    poller: TaskSlot,
    reader: TaskSlot,
    logger: TaskSlot,
}

impl Supervisor {
    /// Opens the configured (or first available) serial device and starts
    /// reading from it. This is the only fallible step that is fatal: if
    /// there's no device, there's nothing to supervise.
    pub fn connect(
        config: Config,
        source: Arc<dyn ReadingSource>,
        sink: EventSink,
    ) -> Result<Supervisor, Error> {
        config.validate()?;
        let path = resolve_device(config.serial.port.as_deref())?;
        let channel = SerialChannel::open(&path, &config.serial)
            .map_err(|e| Error::DeviceUnavailable(format!("unable to open {path}: {e}")))?;
        Supervisor::with_channel(channel, config, source, sink)
    }

    /// Like connect(), but using an already opened channel.
    pub fn with_channel(
        channel: SerialChannel,
        config: Config,
        source: Arc<dyn ReadingSource>,
        sink: EventSink,
    ) -> Result<Supervisor, Error> {
        config.validate()?;
        let supervisor = Supervisor {
            config,
            channel: Arc::new(channel),
            source,
            sink,
            poller: TaskSlot::new(TaskKind::Poller),
            reader: TaskSlot::new(TaskKind::Reader),
            logger: TaskSlot::new(TaskKind::Logger),
        };
        // If this fails, dropping the supervisor closes the channel again.
        supervisor.start_reader()?;
        Ok(supervisor)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        self.channel.name()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.channel.is_open() {
            Ok(())
        } else {
            Err(Error::DeviceUnavailable(format!(
                "{} has been closed",
                self.channel.name()
            )))
        }
    }

    fn started(&self, kind: TaskKind, started: bool) -> bool {
        if started {
            self.sink.publish(&Notification::TaskStarted(kind));
        }
        started
    }

    fn stopped(&self, kind: TaskKind, stopped: bool) -> bool {
        if stopped {
            self.sink.publish(&Notification::TaskStopped(kind));
        }
        stopped
    }

    fn start_reader(&self) -> Result<bool, Error> {
        self.ensure_open()?;
        let started = self.reader.start(|| {
            SerialLineReader::new(
                self.channel.clone(),
                self.config.reader.poll_interval(),
                self.sink.clone(),
            )
            .spawn()
        })?;
        Ok(self.started(TaskKind::Reader, started))
    }

    /// Starts forwarding readings to the device. Returns Ok(false) if polling
    /// was already running.
    pub fn start_polling(&self) -> Result<bool, Error> {
        self.ensure_open()?;
        let Some(endpoint) = self.config.poller.endpoint.clone() else {
            return Err(Error::NoEndpoint);
        };
        let started = self.poller.start(|| {
            SensorPoller::new(
                self.source.clone(),
                endpoint,
                self.channel.clone(),
                self.config.poller.value_divisor,
                self.sink.clone(),
            )
            .spawn(self.config.poller.interval())
        })?;
        Ok(self.started(TaskKind::Poller, started))
    }

    /// Stops polling, waiting for any in-progress tick to complete. Returns
    /// false if polling wasn't running.
    pub fn stop_polling(&self) -> bool {
        self.stopped(TaskKind::Poller, self.poller.stop())
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Starts logging readings to disk. Returns Ok(false) if logging was
    /// already running.
    pub fn start_logging(&self) -> Result<bool, Error> {
        self.ensure_open()?;
        let started = self.logger.start(|| {
            DataLogger::new(
                self.source.clone(),
                self.config.logger.endpoints.clone(),
                self.config.logger.directory.clone(),
                self.sink.clone(),
            )
            .spawn(self.config.logger.interval())
        })?;
        Ok(self.started(TaskKind::Logger, started))
    }

    pub fn stop_logging(&self) -> bool {
        self.stopped(TaskKind::Logger, self.logger.stop())
    }

    pub fn is_logging(&self) -> bool {
        self.logger.is_running()
    }

    /// Starts logging if stopped, stops it if running. Returns whether logging
    /// is now running.
    pub fn toggle_logging(&self) -> Result<bool, Error> {
        if self.stop_logging() {
            Ok(false)
        } else {
            self.start_logging().map(|_| true)
        }
    }

    pub fn is_reading(&self) -> bool {
        self.reader.is_running()
    }

    pub fn send(&self, command: &Command) -> Result<(), Error> {
        self.send_raw(&command.to_wire())
    }

    /// Sends arbitrary text (i.e. manual command entry) to the device. This
    /// shares the poller's write path, so a manual command can never be
    /// interleaved with a reading.
    pub fn send_raw(&self, command: &str) -> Result<(), Error> {
        self.channel
            .write(command)
            .map_err(Error::SerialWriteFault)?;
        self.sink
            .publish(&Notification::CommandSent(command.to_string()));
        Ok(())
    }

    pub fn force_sweep(&self) -> Result<(), Error> {
        self.send(&Command::ForceSweep)
    }

    /// Stops every task (waiting for each to finish whatever it is doing), and
    /// only then closes the serial connection. Safe to call more than once:
    /// later calls do nothing.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.stop_logging();
        self.stopped(TaskKind::Reader, self.reader.stop());
        if self.channel.close() {
            info!("supervisor shut down");
        }
    }

    #[cfg(test)]
    pub(crate) fn channel(&self) -> &SerialChannel {
        &self.channel
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
