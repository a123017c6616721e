//! In-memory stand-ins for the serial port and the reading source.

use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{lock, EventSink, Notification, Reading, ReadingSource};

/// A writer whose output can be inspected after being handed to a
/// SerialChannel.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> SharedBuffer {
        SharedBuffer::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.data)).to_string()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(|line| line.to_string()).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.data).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(ErrorKind::Other, "device unplugged"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Fails the first `failures` writes, then behaves like a SharedBuffer.
#[derive(Clone)]
pub struct FlakyWriter {
    failures: Arc<AtomicUsize>,
    pub out: SharedBuffer,
}

impl FlakyWriter {
    pub fn new(failures: usize) -> FlakyWriter {
        FlakyWriter {
            failures: Arc::new(AtomicUsize::new(failures)),
            out: SharedBuffer::new(),
        }
    }
}

impl Write for FlakyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(std::io::Error::new(ErrorKind::Other, "device unplugged"));
        }
        self.out.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub enum ScriptStep {
    Data(Vec<u8>),
    Fail(ErrorKind),
}

/// A fake serial port read half. Plays back its script, then behaves like an
/// idle port (short sleep, then TimedOut) forever. More steps can be pushed
/// while it is in use.
#[derive(Clone)]
pub struct ScriptedPort {
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
}

impl ScriptedPort {
    pub fn new(steps: Vec<ScriptStep>) -> ScriptedPort {
        ScriptedPort {
            script: Arc::new(Mutex::new(steps.into())),
        }
    }

    pub fn push(&self, step: ScriptStep) {
        lock(&self.script).push_back(step);
    }

    pub fn reader(&self) -> std::io::BufReader<ScriptedPort> {
        std::io::BufReader::new(self.clone())
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let step = lock(&self.script).pop_front();
        match step {
            Some(ScriptStep::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    lock(&self.script).push_front(ScriptStep::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
            Some(ScriptStep::Fail(kind)) => Err(std::io::Error::new(kind, "scripted failure")),
            None => {
                std::thread::sleep(Duration::from_millis(2));
                Err(std::io::Error::new(ErrorKind::TimedOut, "idle"))
            }
        }
    }
}

/// Returns scripted readings per endpoint. Once an endpoint's script runs
/// out, its fallback (if any) is returned.
#[derive(Default)]
pub struct FakeSource {
    scripts: Mutex<HashMap<String, VecDeque<Option<Reading>>>>,
    fallbacks: Mutex<HashMap<String, Reading>>,
}

impl FakeSource {
    pub fn new() -> FakeSource {
        FakeSource::default()
    }

    pub fn script(self, endpoint: &str, readings: Vec<Option<Reading>>) -> FakeSource {
        lock(&self.scripts).insert(endpoint.to_string(), readings.into());
        self
    }

    pub fn always(self, endpoint: &str, reading: Reading) -> FakeSource {
        lock(&self.fallbacks).insert(endpoint.to_string(), reading);
        self
    }
}

impl ReadingSource for FakeSource {
    fn fetch(&self, endpoint: &str) -> Option<Reading> {
        if let Some(next) = lock(&self.scripts)
            .get_mut(endpoint)
            .and_then(|script| script.pop_front())
        {
            return next;
        }
        lock(&self.fallbacks).get(endpoint).cloned()
    }
}

pub fn reading(sensor_type: &str, value: f64, unit: &str) -> Reading {
    Reading {
        sensor_type: sensor_type.to_string(),
        value,
        unit: unit.to_string(),
    }
}

/// Collects every notification published through its sink.
#[derive(Clone, Default)]
pub struct Recorder {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder::default()
    }

    pub fn sink(&self) -> EventSink {
        let notifications = self.notifications.clone();
        EventSink::new(move |notification| lock(&notifications).push(notification.clone()))
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *lock(&self.notifications))
    }

    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        lock(&self.notifications)
            .iter()
            .filter(|notification| predicate(notification))
            .count()
    }

    /// Polls until at least n matching notifications have arrived (or a few
    /// seconds have passed, in which case the caller's assertion will fail).
    pub fn wait_for(&self, n: usize, predicate: impl Fn(&Notification) -> bool) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let count = self.count(&predicate);
            if count >= n || Instant::now() > deadline {
                return count;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// A fresh, empty directory for file-based tests.
pub fn temp_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "valvelink-{name}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("unable to create test directory");
    dir
}
