//! # I/O Service
//!
//! One background OS thread (`mbus-io`) running a current-thread tokio
//! runtime. It owns every transport once started and is the only thread
//! that touches their sockets.
//!
//! ## State Machine
//!
//! ```text
//!   Staged ──start()──▶ Active ──destroy()──▶ Destroyed
//!     │                                          ▲
//!     └────────────────destroy()─────────────────┘
//! ```
//!
//! Transports staged before `start()` are activated together when the
//! thread starts. Transports added while active are activated at once,
//! without pausing the others. Destroy is irreversible.

mod driver;

pub use crate::transport::Transport;

use crate::error::NetError;
use crate::DEFAULT_POLL_INTERVAL_MS;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Name of the I/O thread.
pub const IO_THREAD_NAME: &str = "mbus-io";

thread_local! {
    static ON_IO_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is an I/O service thread.
#[must_use]
pub fn is_io_thread() -> bool {
    ON_IO_THREAD.with(Cell::get)
}

/// Observable service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Not yet started; transports may be staged.
    Staged,
    /// The I/O thread is running.
    Active,
    /// Destroyed; nothing can be added.
    Destroyed,
}

pub(crate) enum Control {
    Add(Box<dyn Transport>),
    Remove(String),
    Shutdown,
}

struct Running {
    control: mpsc::UnboundedSender<Control>,
    done: std_mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

enum State {
    Staged(Vec<Box<dyn Transport>>),
    Active(Running),
    Destroyed,
}

/// Background I/O service hosting the bus transports.
pub struct IoService {
    state: Mutex<State>,
    poll_interval: Duration,
}

impl Default for IoService {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }
}

impl IoService {
    /// Create a service polling each transport with a bounded `poll_interval`.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(State::Staged(Vec::new())),
            poll_interval,
        }
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        match &*self.state.lock() {
            State::Staged(_) => ServiceStatus::Staged,
            State::Active(_) => ServiceStatus::Active,
            State::Destroyed => ServiceStatus::Destroyed,
        }
    }

    /// Queue a transport for activation at `start()`. On a running service
    /// this is the same as [`IoService::add`].
    pub fn stage(&self, transport: Box<dyn Transport>) -> Result<(), NetError> {
        self.add(transport)
    }

    /// Add a transport. Activated immediately when the service is running.
    pub fn add(&self, transport: Box<dyn Transport>) -> Result<(), NetError> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Staged(pending) => {
                debug!(transport = transport.name(), "[mbus] Transport staged");
                pending.push(transport);
                Ok(())
            }
            State::Active(running) => running
                .control
                .send(Control::Add(transport))
                .map_err(|_| NetError::Destroyed),
            State::Destroyed => Err(NetError::Destroyed),
        }
    }

    /// Release and drop the transport called `name`.
    pub fn remove(&self, name: &str) -> Result<(), NetError> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Staged(pending) => {
                pending.retain_mut(|t| {
                    if t.name() == name {
                        t.release();
                        false
                    } else {
                        true
                    }
                });
                Ok(())
            }
            State::Active(running) => running
                .control
                .send(Control::Remove(name.to_string()))
                .map_err(|_| NetError::Destroyed),
            State::Destroyed => Err(NetError::Destroyed),
        }
    }

    /// Start the I/O thread with every staged transport. Idempotent while
    /// running.
    pub fn start(&self) -> Result<(), NetError> {
        let mut state = self.state.lock();
        let pending = match &mut *state {
            State::Staged(pending) => pending,
            State::Active(_) => return Ok(()),
            State::Destroyed => return Err(NetError::Destroyed),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let transports = std::mem::take(pending);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std_mpsc::channel();
        let poll_interval = self.poll_interval;

        let thread = std::thread::Builder::new()
            .name(IO_THREAD_NAME.to_string())
            .spawn(move || {
                ON_IO_THREAD.with(|flag| flag.set(true));
                runtime.block_on(driver::run(transports, control_rx, poll_interval));
                drop(runtime);
                let _ = done_tx.send(());
            })
            .map_err(|e| NetError::Spawn(e.to_string()))?;

        info!(poll_ms = poll_interval.as_millis() as u64, "[mbus] I/O service started");
        *state = State::Active(Running {
            control: control_tx,
            done: done_rx,
            thread,
        });
        Ok(())
    }

    /// Stop the I/O thread, releasing every transport.
    ///
    /// Waits up to `timeout` for the thread to finish. Returns `false` if it
    /// did not finish in time. Idempotent. Called from the I/O thread itself,
    /// it requests the stop and returns without waiting.
    pub fn destroy(&self, timeout: Duration) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Destroyed);
        match previous {
            State::Destroyed => true,
            State::Staged(mut pending) => {
                for transport in &mut pending {
                    transport.release();
                }
                true
            }
            State::Active(running) => {
                let _ = running.control.send(Control::Shutdown);
                if is_io_thread() {
                    return true;
                }
                match running.done.recv_timeout(timeout) {
                    Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                        if running.thread.join().is_err() {
                            warn!("[mbus] I/O thread panicked");
                        }
                        info!("[mbus] I/O service destroyed");
                        true
                    }
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {
                        warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "[mbus] I/O thread did not stop in time"
                        );
                        false
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for IoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoService")
            .field("status", &self.status())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
