//! # Shutdown Hook
//!
//! Purpose: Close the pool when the process is asked to terminate, without
//! making that the only way to shut down.
//!
//! The hook is a background task on its own thread running a current-thread
//! tokio runtime. It waits for the first of:
//! - SIGINT / SIGTERM (Ctrl-C on non-unix), when `listen_signals` is set:
//!   close the pool, then exit with status 0 if `exit_on_signal` is set;
//! - `trigger()`: close the pool and stop;
//! - `cancel()` or drop: stop without closing.
//!
//! OS signal listening is registered at most once per process. Once
//! registered, tokio's handlers replace the default disposition for the life
//! of the process, so after the hook finishes for any reason without exiting,
//! its thread keeps listening and exits with status 0 on the next signal.
//! `close` is idempotent, so a hook racing an explicit close is harmless.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ClientError, ClientResult};
use crate::pool::ConnectionPool;

static SIGNALS_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Hook behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOptions {
    /// Listen for process termination signals.
    pub listen_signals: bool,
    /// Exit the process with status 0 after a signal closed the pool. When
    /// unset, the first signal only closes the pool and a second one exits.
    pub exit_on_signal: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        HookOptions {
            listen_signals: true,
            exit_on_signal: true,
        }
    }
}

/// Why the hook stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal arrived; the pool was closed.
    Signal,
    /// `trigger()` was called; the pool was closed.
    Triggered,
    /// The hook was cancelled; the pool was left alone.
    Cancelled,
}

enum Command {
    Trigger,
    Cancel,
}

/// Handle to the background shutdown task.
pub struct ShutdownHook {
    commands: Mutex<Option<oneshot::Sender<Command>>>,
    finished: Mutex<Option<mpsc::Receiver<ShutdownReason>>>,
    outcome: Mutex<Option<ShutdownReason>>,
    fired: Arc<AtomicBool>,
}

impl ShutdownHook {
    /// Starts the hook for `pool`.
    ///
    /// Fails if signal listening was already registered in this process, or if
    /// the signal handlers cannot be installed.
    pub fn install(pool: ConnectionPool, options: HookOptions) -> ClientResult<Self> {
        if options.listen_signals && SIGNALS_REGISTERED.swap(true, Ordering::SeqCst) {
            return Err(ClientError::usage(
                "shutdown hook already registered for this process",
            ));
        }

        match Self::spawn(pool, options) {
            Ok(hook) => Ok(hook),
            Err(err) => {
                if options.listen_signals {
                    SIGNALS_REGISTERED.store(false, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    fn spawn(pool: ConnectionPool, options: HookOptions) -> ClientResult<Self> {
        let (command_tx, command_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (finished_tx, finished_rx) = mpsc::channel();
        let fired = Arc::new(AtomicBool::new(false));
        let task_fired = fired.clone();

        // Detached once running: a signal-listening task outlives the handle.
        let task = thread::Builder::new()
            .name("rkv-shutdown".to_string())
            .spawn(move || run(pool, options, command_rx, ready_tx, finished_tx, task_fired))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = task.join();
                return Err(ClientError::Io(err));
            }
            Err(_) => {
                let _ = task.join();
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "shutdown task exited during setup",
                )));
            }
        }

        tracing::debug!(listen_signals = options.listen_signals, "shutdown hook installed");
        Ok(ShutdownHook {
            commands: Mutex::new(Some(command_tx)),
            finished: Mutex::new(Some(finished_rx)),
            outcome: Mutex::new(None),
            fired,
        })
    }

    /// Closes the pool now, as a signal would, without exiting the process.
    ///
    /// Returns once the pool is closed. No-op if the hook already finished.
    pub fn trigger(&self) -> ShutdownReason {
        self.send(Command::Trigger);
        self.wait()
    }

    /// Stands the hook down without touching the pool. A later termination
    /// signal still exits the process.
    pub fn cancel(&self) -> ShutdownReason {
        self.send(Command::Cancel);
        self.wait()
    }

    /// True once the hook has closed the pool.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Blocks until the hook has acted (or stood down) and returns why.
    pub fn wait(&self) -> ShutdownReason {
        let mut outcome = self.outcome.lock();
        if let Some(reason) = *outcome {
            return reason;
        }
        let reason = match self.finished.lock().take() {
            Some(finished) => finished.recv().unwrap_or(ShutdownReason::Cancelled),
            None => ShutdownReason::Cancelled,
        };
        *outcome = Some(reason);
        reason
    }

    fn send(&self, command: Command) {
        if let Some(sender) = self.commands.lock().take() {
            let _ = sender.send(command);
        }
    }
}

impl std::fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("fired", &self.has_fired())
            .field("outcome", &*self.outcome.lock())
            .finish()
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run(
    pool: ConnectionPool,
    options: HookOptions,
    commands: oneshot::Receiver<Command>,
    ready: mpsc::Sender<io::Result<()>>,
    finished: mpsc::Sender<ShutdownReason>,
    fired: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let mut signals = if options.listen_signals {
        let _context = runtime.enter();
        match TerminationSignals::register() {
            Ok(signals) => Some(signals),
            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        }
    } else {
        None
    };
    let _ = ready.send(Ok(()));

    let reason = runtime.block_on(async {
        tokio::select! {
            _ = wait_for_signal(signals.as_mut()) => ShutdownReason::Signal,
            command = commands => match command {
                Ok(Command::Trigger) => ShutdownReason::Triggered,
                Ok(Command::Cancel) | Err(_) => ShutdownReason::Cancelled,
            },
        }
    });

    match reason {
        ShutdownReason::Signal | ShutdownReason::Triggered => {
            pool.close();
            fired.store(true, Ordering::SeqCst);
            tracing::info!(?reason, "shutdown hook closed connection pool");
            if reason == ShutdownReason::Signal && options.exit_on_signal {
                std::process::exit(0);
            }
        }
        ShutdownReason::Cancelled => {
            tracing::debug!("shutdown hook cancelled");
        }
    }
    drop(pool);
    let _ = finished.send(reason);

    // The handlers stay installed, so the next signal must still end the process.
    if let Some(signals) = signals.as_mut() {
        runtime.block_on(signals.recv());
        tracing::info!("termination signal after shutdown hook finished, exiting");
        std::process::exit(0);
    }
}

async fn wait_for_signal(signals: Option<&mut TerminationSignals>) {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(TerminationSignals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn register() -> io::Result<Self> {
        Ok(TerminationSignals)
    }

    async fn recv(&mut self) {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
