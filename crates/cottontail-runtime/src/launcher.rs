//! Blocks a consumer's caller until shutdown is requested.
//!
//! [`Launcher::start`] waits for either a termination signal (Ctrl+C, and
//! `SIGTERM`/`SIGQUIT` on unix) or a programmatic [`Launcher::stop`].
//! Signal handlers are registered on every `start` call and dropped when
//! it returns.
//!
//! A launcher is armed before the session starts, so a `stop` arriving
//! while the connection is still being set up releases the following
//! `start` immediately instead of being lost. Re-arming releases whatever
//! `start` is still waiting on the previous arming.

use parking_lot::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConsumerError, ConsumerResult};

/// Why [`Launcher::start`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// A termination signal arrived.
    Signal(&'static str),
    /// [`Launcher::stop`] was called.
    Released,
}

#[derive(Default)]
struct LauncherState {
    token: Option<CancellationToken>,
    epoch: u64,
}

impl LauncherState {
    fn rearm(&mut self) -> (CancellationToken, u64) {
        if let Some(previous) = self.token.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        self.epoch += 1;
        self.token = Some(token.clone());
        (token, self.epoch)
    }
}

/// The blocking main loop of a consumer process.
pub struct Launcher {
    state: Mutex<LauncherState>,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    /// Creates an idle launcher.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LauncherState::default()),
        }
    }

    /// Prepares a fresh release token for the next [`start`](Self::start).
    ///
    /// A `start` still blocked on the previous token is released.
    pub fn arm(&self) {
        self.state.lock().rearm();
    }

    /// Returns `true` between [`arm`](Self::arm) and the end of the
    /// following `start`.
    pub fn is_armed(&self) -> bool {
        self.state.lock().token.is_some()
    }

    /// Blocks until a termination signal arrives or [`stop`](Self::stop) is
    /// called.
    pub async fn start(&self) -> ConsumerResult<Shutdown> {
        let (token, epoch) = {
            let mut state = self.state.lock();
            match &state.token {
                Some(token) => (token.clone(), state.epoch),
                None => state.rearm(),
            }
        };

        debug!(epoch, "Launcher waiting for shutdown");
        let result = wait_for_shutdown(&token).await;

        let mut state = self.state.lock();
        if state.epoch == epoch {
            state.token = None;
        }
        result
    }

    /// Releases a blocked (or about to block) [`start`](Self::start).
    ///
    /// Returns `false` when the launcher was not armed.
    pub fn stop(&self) -> bool {
        match &self.state.lock().token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(token: &CancellationToken) -> ConsumerResult<Shutdown> {
    use signal::unix::{SignalKind, signal as unix_signal};

    let mut terminate = unix_signal(SignalKind::terminate()).map_err(ConsumerError::Signal)?;
    let mut quit = unix_signal(SignalKind::quit()).map_err(ConsumerError::Signal)?;

    tokio::select! {
        _ = token.cancelled() => Ok(Shutdown::Released),
        result = signal::ctrl_c() => {
            result.map_err(ConsumerError::Signal)?;
            Ok(Shutdown::Signal("SIGINT"))
        }
        _ = terminate.recv() => Ok(Shutdown::Signal("SIGTERM")),
        _ = quit.recv() => Ok(Shutdown::Signal("SIGQUIT")),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(token: &CancellationToken) -> ConsumerResult<Shutdown> {
    tokio::select! {
        _ = token.cancelled() => Ok(Shutdown::Released),
        result = signal::ctrl_c() => {
            result.map_err(ConsumerError::Signal)?;
            Ok(Shutdown::Signal("Ctrl+C"))
        }
    }
}
