use std::io::{BufRead, Write};
use std::sync::Mutex;

use tracing::info;

use crate::config::SerialConfig;
use crate::error::{Error, SerialError};
use crate::lock;

struct LineReader {
    inner: Box<dyn BufRead + Send>,
    // Holds a partial line across read timeouts: a line may well straddle a
    // timeout, and we don't want to emit it in two halves. Kept as bytes
    // since a timeout can also split a multi-byte character.
    buf: Vec<u8>,
}

/// The one open serial connection. Writers (the poller, manual commands)
/// serialise through the writer lock. Reads are only ever performed by the
/// line reader, the reader lock exists purely so that the channel can be
/// shared and closed - it is never contended.
pub struct SerialChannel {
    name: String,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    reader: Mutex<Option<LineReader>>,
}

impl SerialChannel {
    pub fn open(path: &str, config: &SerialConfig) -> Result<SerialChannel, SerialError> {
        let port = serialport::new(path, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            // read_line() must return periodically (with Ok(None)) so that the
            // reader task can notice being stopped.
            .timeout(config.read_timeout())
            .open()?;
        // Reads and writes are performed from different threads, and both need
        // &mut access - cloning the port is the simplest way to split it.
        let reader = std::io::BufReader::new(port.try_clone()?);
        info!("opened {path} at {} baud", config.baud_rate);
        Ok(SerialChannel::from_parts(path, port, reader))
    }

    /// Builds a channel from an arbitrary writer/reader pair. open() uses this
    /// with the two halves of a serial port, tests use it with in-memory fakes.
    pub fn from_parts(
        name: &str,
        writer: impl Write + Send + 'static,
        reader: impl BufRead + Send + 'static,
    ) -> SerialChannel {
        SerialChannel {
            name: name.to_string(),
            writer: Mutex::new(Some(Box::new(writer))),
            reader: Mutex::new(Some(LineReader {
                inner: Box::new(reader),
                buf: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes one newline-terminated command. The command and its terminator
    /// are written under one lock, concurrent writers can't interleave.
    pub fn write(&self, command: &str) -> Result<(), SerialError> {
        let mut writer = lock(&self.writer);
        let Some(writer) = writer.as_mut() else {
            return Err(SerialError::closed());
        };
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        info!("sent: {command}");
        Ok(())
    }

    /// Returns the next complete line (trimmed, possibly empty), or None if
    /// no complete line arrived before the read timeout.
    pub fn read_line(&self) -> Result<Option<String>, SerialError> {
        let mut reader = lock(&self.reader);
        let Some(reader) = reader.as_mut() else {
            return Err(SerialError::closed());
        };
        match reader.inner.read_until(b'\n', &mut reader.buf) {
            // Nothing to read. Serial ports generally report TimedOut instead,
            // but some drivers (and all in-memory readers) return EOF.
            Ok(0) => Ok(None),
            Ok(_) => {
                if reader.buf.last() != Some(&b'\n') {
                    // EOF in the middle of a line, wait for the rest.
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&reader.buf).trim().to_string();
                reader.buf.clear();
                Ok(Some(line))
            }
            Err(error) => match error.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Ok(None),
                _ => {
                    // Whatever we had is most likely garbage now.
                    reader.buf.clear();
                    Err(error.into())
                }
            },
        }
    }

    /// Closes the connection. Returns true only for the call that actually
    /// closed it, subsequent calls are no-ops. Any read/write after closing
    /// fails with a SerialError.
    pub fn close(&self) -> bool {
        let writer = lock(&self.writer).take();
        let reader = lock(&self.reader).take();
        let closed = writer.is_some() || reader.is_some();
        if closed {
            info!("closed {}", self.name);
        }
        closed
    }

    pub fn is_open(&self) -> bool {
        lock(&self.writer).is_some()
    }
}

/// Lists the names of all serial ports known to the OS.
pub fn available_devices() -> Result<Vec<String>, Error> {
    let ports =
        serialport::available_ports().map_err(|e| Error::DeviceUnavailable(e.description))?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// Picks the device to connect to: the configured one if any, otherwise the
/// first port the OS reports. (Interactive selection is left to the UI.)
pub fn resolve_device(configured: Option<&str>) -> Result<String, Error> {
    if let Some(path) = configured {
        return Ok(path.to_string());
    }
    available_devices()?
        .into_iter()
        .next()
        .ok_or_else(|| Error::DeviceUnavailable("no serial ports found".to_string()))
}
