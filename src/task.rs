//! Thread lifecycle shared by all background tasks.
//!
//! Each task runs on its own thread, and is told to stop by dropping the
//! sending half of a channel: the task notices either while waiting for its
//! next tick (`StopSignal::wait` returns immediately), or at the latest once
//! its current tick completes. Stopping always joins the thread, so once
//! `TaskHandle::stop` returns nothing belonging to that task will touch the
//! serial port again.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::Error;
use crate::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Poller,
    Reader,
    Logger,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskKind::Poller => "sensor poller",
            TaskKind::Reader => "serial reader",
            TaskKind::Logger => "data logger",
        })
    }
}

/// When a periodic task runs its first tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FirstTick {
    Immediate,
    AfterInterval,
}

pub struct StopSignal {
    rx_stop: Receiver<()>,
}

impl StopSignal {
    /// Sleeps for up to timeout, returning early (with true) if the task has
    /// been asked to stop.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx_stop.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            // Nothing is ever actually sent: the sender being dropped is the
            // stop request.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    pub fn is_stopped(&self) -> bool {
        !matches!(self.rx_stop.try_recv(), Err(TryRecvError::Empty))
    }
}

pub struct TaskHandle {
    kind: TaskKind,
    tx_stop: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn(
        kind: TaskKind,
        body: impl FnOnce(StopSignal) + Send + 'static,
    ) -> Result<TaskHandle, Error> {
        let (tx_stop, rx_stop) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(kind.to_string())
            .spawn(move || body(StopSignal { rx_stop }))
            .map_err(|e| Error::TaskSpawn {
                task: kind,
                message: e.to_string(),
            })?;
        info!("{kind} started");
        Ok(TaskHandle {
            kind,
            tx_stop,
            thread,
        })
    }

    /// Runs tick every interval until stopped. Ticks that overrun the
    /// interval delay the next tick, but missed ticks are not made up for.
    pub fn spawn_periodic(
        kind: TaskKind,
        interval: Duration,
        first_tick: FirstTick,
        mut tick: impl FnMut() + Send + 'static,
    ) -> Result<TaskHandle, Error> {
        TaskHandle::spawn(kind, move |stop| {
            let mut next = match first_tick {
                FirstTick::Immediate => Instant::now(),
                FirstTick::AfterInterval => Instant::now() + interval,
            };
            loop {
                let now = Instant::now();
                let stopped = if next > now {
                    stop.wait(next - now)
                } else {
                    stop.is_stopped()
                };
                if stopped {
                    return;
                }
                tick();
                next += interval;
                let now = Instant::now();
                if next < now {
                    next = now;
                }
            }
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stops the task and waits for it to exit.
    pub fn stop(self) {
        let TaskHandle {
            kind,
            tx_stop,
            thread,
        } = self;
        drop(tx_stop);
        if thread.thread().id() == thread::current().id() {
            // A task stopping itself (i.e. a notification callback asking to
            // stop the task that sent the notification). Joining would
            // deadlock, but the task will exit as soon as the callback
            // returns anyway.
            info!("{kind} stopping (from within task)");
            return;
        }
        if thread.join().is_err() {
            error!("{kind} panicked");
        } else {
            info!("{kind} stopped");
        }
    }
}

/// Holds at most one running task of a given kind.
pub struct TaskSlot {
    kind: TaskKind,
    // Serialises start/stop, and is held while joining, so that a new task
    // can never be started while the previous one is still winding down.
    lifecycle: Mutex<()>,
    // Only ever held briefly, so that is_running() can be called from
    // notification callbacks even while the task is being stopped.
    handle: Mutex<Option<TaskHandle>>,
}

impl TaskSlot {
    pub fn new(kind: TaskKind) -> TaskSlot {
        TaskSlot {
            kind,
            lifecycle: Mutex::new(()),
            handle: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Starts the task using spawn, unless it is already running. Returns
    /// whether a task was started.
    pub fn start(
        &self,
        spawn: impl FnOnce() -> Result<TaskHandle, Error>,
    ) -> Result<bool, Error> {
        let _lifecycle = lock(&self.lifecycle);
        let mut handle = lock(&self.handle);
        match handle.take() {
            Some(running) if !running.is_finished() => {
                *handle = Some(running);
                return Ok(false);
            }
            Some(finished) => {
                // Tasks only exit on their own if they panicked.
                warn!("{} exited unexpectedly, restarting", self.kind);
                drop(finished);
            }
            None => (),
        }
        *handle = Some(spawn()?);
        Ok(true)
    }

    /// Stops the task if it is running, and waits for it to exit. Returns
    /// whether a task was stopped.
    pub fn stop(&self) -> bool {
        let _lifecycle = lock(&self.lifecycle);
        let Some(running) = lock(&self.handle).take() else {
            return false;
        };
        running.stop();
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|running| !running.is_finished())
    }
}
