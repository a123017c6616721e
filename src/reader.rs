use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::protocol::{classify_line, SerialEvent};
use crate::serial::SerialChannel;
use crate::task::{TaskHandle, TaskKind};
use crate::{EventSink, Notification};

/// Reads and classifies telemetry from the valve controller. This is the only
/// component that ever reads from the serial channel.
pub struct SerialLineReader {
    channel: Arc<SerialChannel>,
    poll_interval: Duration,
    sink: EventSink,
}

impl SerialLineReader {
    pub fn new(
        channel: Arc<SerialChannel>,
        poll_interval: Duration,
        sink: EventSink,
    ) -> SerialLineReader {
        SerialLineReader {
            channel,
            poll_interval,
            sink,
        }
    }

    /// Reads at most one line. Blank lines are swallowed, same as timeouts.
    pub fn read_once(&self) -> Result<Option<SerialEvent>, Error> {
        match self.channel.read_line() {
            Ok(Some(line)) if !line.is_empty() => {
                debug!("received: {line}");
                Ok(Some(classify_line(&line)))
            }
            Ok(_) => Ok(None),
            Err(e) => Err(Error::SerialReadFault(e)),
        }
    }

    /// Returns true if a line was received, in which case there may well be
    /// more waiting.
    pub fn step(&self) -> bool {
        match self.read_once() {
            Ok(Some(event)) => {
                self.sink.publish(&Notification::Serial(event));
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.sink.error(TaskKind::Reader, e);
                false
            }
        }
    }

    pub fn spawn(self) -> Result<TaskHandle, Error> {
        TaskHandle::spawn(TaskKind::Reader, move |stop| loop {
            // Drain lines back-to-back while the device is chatty, only
            // pausing once it goes quiet (or errors out, in which case
            // retrying immediately would just spin).
            let stopped = if self.step() {
                stop.is_stopped()
            } else {
                stop.wait(self.poll_interval)
            };
            if stopped {
                return;
            }
        })
    }
}
