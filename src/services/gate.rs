//! Named network gates.
//!
//! Every outbound HTTP request holds a shared pass on a gate for its whole
//! duration. Taking the gate exclusively pauses all traffic under that name
//! until the hold is released, either by the holder (after a fixed delay) or
//! from outside (SIGHUP).
//!
//! Gates are created lazily by a [`GateRegistry`] that is built once per
//! process and handed to every component that issues HTTP.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::{Notify, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::Result;
use crate::models::GateConfig;

/// Shared access to a gate. Dropping the pass releases it.
#[derive(Debug)]
pub struct GatePass {
    _guard: OwnedRwLockReadGuard<()>,
}

/// A named readers-writer lock around outbound traffic.
#[derive(Debug)]
pub struct NetworkGate {
    name: String,
    lock: Arc<RwLock<()>>,
    held: StdMutex<Option<OwnedRwLockWriteGuard<()>>>,
    release_delay: Duration,
    released: Notify,
}

impl NetworkGate {
    pub fn new(name: impl Into<String>, release_delay: Duration) -> Self {
        Self {
            name: name.into(),
            lock: Arc::new(RwLock::new(())),
            held: StdMutex::new(None),
            release_delay,
            released: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for shared access. Blocks while an exclusive hold is outstanding.
    pub async fn acquire_shared(&self) -> GatePass {
        GatePass {
            _guard: Arc::clone(&self.lock).read_owned().await,
        }
    }

    /// Pause all traffic under this gate. Waits for in-flight requests to
    /// finish; new shared acquires queue behind the hold.
    pub async fn acquire_exclusive(&self) {
        let guard = Arc::clone(&self.lock).write_owned().await;
        *self.held() = Some(guard);
        log::info!("[gate] '{}' locked", self.name);
    }

    /// Whether an exclusive hold is outstanding.
    pub fn is_held(&self) -> bool {
        self.held().is_some()
    }

    /// Release the exclusive hold after the configured delay.
    pub async fn release_exclusive(&self) -> bool {
        if !self.release_delay.is_zero() {
            tokio::time::sleep(self.release_delay).await;
        }
        self.release_now("after delay")
    }

    /// Release the exclusive hold immediately.
    ///
    /// Returns `false`, and logs the race, when nothing was held.
    pub fn release_now(&self, reason: &str) -> bool {
        let guard = self.held().take();
        match guard {
            Some(guard) => {
                drop(guard);
                self.released.notify_waiters();
                log::info!("[gate] '{}' unlocked {}", self.name, reason);
                true
            }
            None => {
                log::warn!(
                    "[gate][race] '{}' release requested {} but no exclusive hold is outstanding",
                    self.name,
                    reason
                );
                false
            }
        }
    }

    /// Wait until the exclusive hold is released by someone else.
    ///
    /// Returns `true` if the gate is free before the timeout.
    pub async fn wait_released(&self, timeout: Duration) -> bool {
        let notified = self.released.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_held() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    fn held(&self) -> MutexGuard<'_, Option<OwnedRwLockWriteGuard<()>>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide registry of gates keyed by name.
#[derive(Debug)]
pub struct GateRegistry {
    gates: StdRwLock<HashMap<String, Arc<NetworkGate>>>,
    release_delay: Duration,
}

impl GateRegistry {
    pub fn new(release_delay: Duration) -> Self {
        Self {
            gates: StdRwLock::new(HashMap::new()),
            release_delay,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(Duration::from_millis(config.release_delay_ms))
    }

    /// The gate for `name`, created on first use.
    pub fn gate(&self, name: &str) -> Arc<NetworkGate> {
        if let Some(gate) = self
            .gates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Arc::clone(gate);
        }
        let mut gates = self.gates.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            gates
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(NetworkGate::new(name, self.release_delay))),
        )
    }

    /// Release the named gate whenever the process receives SIGHUP.
    #[cfg(unix)]
    pub fn watch_sighup(&self, name: &str) -> Result<tokio::task::JoinHandle<()>> {
        use tokio::signal::unix::{SignalKind, signal};

        let gate = self.gate(name);
        let mut hangups = signal(SignalKind::hangup())?;
        log::info!("[gate] SIGHUP unlock enabled for '{}'", gate.name());

        Ok(tokio::spawn(async move {
            while hangups.recv().await.is_some() {
                gate.release_now("by SIGHUP signal");
            }
        }))
    }
}

/// Pauses traffic while an external process reacts to a named-pipe signal.
///
/// Used when the source starts denying access: the pipe reader is expected
/// to rotate the network route (for example, restart a VPN) and send SIGHUP
/// once done. Without that signal the gate is released after
/// `signal_timeout`. A pipe nobody reads within `signal_timeout` fails the
/// signal without taking the gate.
#[derive(Debug)]
pub struct NetworkPause {
    gate: Arc<NetworkGate>,
    fifo: PathBuf,
    signal_timeout: Duration,
    external_release: bool,
    signalling: AtomicBool,
}

impl NetworkPause {
    pub fn new(gate: Arc<NetworkGate>, fifo: impl Into<PathBuf>, config: &GateConfig) -> Self {
        Self {
            gate,
            fifo: fifo.into(),
            signal_timeout: Duration::from_secs(config.signal_timeout_secs),
            external_release: config.sighup_release,
            signalling: AtomicBool::new(false),
        }
    }

    pub fn is_signalling(&self) -> bool {
        self.signalling.load(Ordering::SeqCst)
    }

    /// Signal the pipe in the background. Returns `false` if a signal is
    /// already in flight.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self.signalling.swap(true, Ordering::SeqCst) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.signal().await {
                log::error!("[gate][fifo] failed to signal '{}': {}", this.fifo.display(), e);
            }
            this.signalling.store(false, Ordering::SeqCst);
        });
        true
    }

    #[cfg(unix)]
    async fn signal(&self) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        ensure_fifo(&self.fifo)?;
        let mut pipe = open_pipe(&self.fifo, self.signal_timeout).await?;

        self.gate.acquire_exclusive().await;
        let written = pipe.write_all(b"x").await;
        drop(pipe);

        match written {
            Ok(()) => {
                log::info!("[gate][fifo] signal sent to '{}'", self.fifo.display());
                if self.external_release && self.gate.wait_released(self.signal_timeout).await {
                    return Ok(());
                }
                self.gate.release_exclusive().await;
                Ok(())
            }
            Err(e) => {
                self.gate.release_now("after failed pipe write");
                Err(e.into())
            }
        }
    }

    #[cfg(not(unix))]
    async fn signal(&self) -> Result<()> {
        Err(crate::error::AppError::config(format!(
            "named pipe {} requires a unix platform",
            self.fifo.display()
        )))
    }
}

/// Interval between attempts to open a pipe that has no reader yet.
#[cfg(unix)]
const PIPE_RETRY: Duration = Duration::from_millis(50);

/// Open the write end of a named pipe without blocking, retrying until a
/// reader shows up or `timeout` passes.
#[cfg(unix)]
async fn open_pipe(path: &Path, timeout: Duration) -> Result<tokio::net::unix::pipe::Sender> {
    use tokio::net::unix::pipe;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            // ENXIO: no reader has the pipe open.
            Err(e)
                if e.raw_os_error() == Some(libc::ENXIO)
                    && tokio::time::Instant::now() < deadline =>
            {
                tokio::time::sleep(PIPE_RETRY).await;
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no reader on {} after {:?}", path.display(), timeout),
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn ensure_fifo(path: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if path.exists() {
        return Ok(());
    }
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(std::io::Error::other)?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o755) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
