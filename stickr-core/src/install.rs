//! Coordinates the single background install.
//!
//! The [`Coordinator`] owns at most one running job. It spawns the
//! [`Installer`] on its own thread, relays the installer's progress through
//! the [`Notifier`] and turns its result into an outcome signal. Cancellation
//! is cooperative: the installer polls its [`CancelToken`] at checkpoints and
//! returns [`Error::InstallCancelled`].
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::device::Target;
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::source::Source;

/// Which kind of backend the coordinator drives. Installers behave
/// differently for fastboot devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendVariant {
    #[default]
    Standard,
    Fastboot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A shared flag asking a running install to stop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(InstallCancelled)` once cancellation was requested, for
    /// use with `?` at checkpoints.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::InstallCancelled)
        } else {
            Ok(())
        }
    }
}

/// What the caller asks to install, and where.
#[derive(Clone, Debug)]
pub struct InstallRequest {
    pub source: Source,
    pub target: Target,
    /// Requested persistence size in bytes.
    pub persist: u64,
    /// Writes to this device instead of the target's own id.
    pub device: Option<PathBuf>,
    /// Lets the installer write to system-internal disks.
    pub allow_system_internal: bool,
}

/// A request as handed to the installer, with the backend variant attached.
/// The job owns copies of the source and target, so registry changes during
/// the install do not affect it.
#[derive(Clone, Debug)]
pub struct InstallJob {
    pub request: InstallRequest,
    pub fastboot: bool,
}

/// The installer's view of the outside world while it runs.
pub struct InstallContext {
    notifier: Notifier,
    token: CancelToken,
}

impl InstallContext {
    pub fn new(notifier: Notifier, token: CancelToken) -> Self {
        Self { notifier, token }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn progress(&self, complete: u64, remaining: u64, speed: f64) {
        self.notifier.install_progress(complete, remaining, speed);
    }

    pub fn message(&self, message: &str) {
        self.notifier.install_progress_message(message);
    }

    pub fn pulse_start(&self) {
        self.notifier.install_progress_pulse_start();
    }

    pub fn pulse_stop(&self) {
        self.notifier.install_progress_pulse_stop();
    }

    /// Relays a retry prompt; whether to start again is the caller's call.
    pub fn retry(&self, message: &str) {
        self.notifier.install_retry(message);
    }
}

/// The long-running operation that puts a source onto a target.
///
/// Implementations must check the context's cancel token regularly and
/// return [`Error::InstallCancelled`] when it is set.
pub trait Installer: Send + Sync + 'static {
    fn install(&self, job: &InstallJob, ctx: &InstallContext) -> Result<()>;
}

struct Job {
    handle: JoinHandle<()>,
    token: CancelToken,
    done: Receiver<()>,
}

pub struct Coordinator {
    installer: Arc<dyn Installer>,
    variant: BackendVariant,
    notifier: Notifier,
    state: Arc<Mutex<InstallState>>,
    job: Option<Job>,
}

impl Coordinator {
    pub fn new(installer: Arc<dyn Installer>, variant: BackendVariant, notifier: Notifier) -> Self {
        Self {
            installer,
            variant,
            notifier,
            state: Arc::new(Mutex::new(InstallState::Idle)),
            job: None,
        }
    }

    pub fn variant(&self) -> BackendVariant {
        self.variant
    }

    pub fn state(&self) -> InstallState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a job is still working. A job stops being alive as soon as
    /// its outcome is recorded, even if its thread has not exited yet.
    pub fn is_alive(&self) -> bool {
        self.job.is_some() && self.state() == InstallState::Running
    }

    /// Starts the install on a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if a previous job is still alive, or
    /// [`Error::Io`] if the thread cannot be spawned.
    pub fn start(&mut self, request: InstallRequest) -> Result<()> {
        if self.is_alive() {
            return Err(Error::AlreadyRunning);
        }
        self.reap();

        let job = InstallJob {
            request,
            fastboot: self.variant == BackendVariant::Fastboot,
        };
        let token = CancelToken::new();
        let ctx = InstallContext::new(self.notifier.clone(), token.clone());
        let installer = self.installer.clone();
        let notifier = self.notifier.clone();
        let state = self.state.clone();
        let (done_tx, done) = mpsc::channel();

        debug!(
            "Starting install thread: {} -> {}",
            job.request.source.path.display(),
            job.request.target.id
        );
        *state.lock().unwrap_or_else(PoisonError::into_inner) = InstallState::Running;

        let spawned = thread::Builder::new()
            .name("stickr-install".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| installer.install(&job, &ctx)))
                    .unwrap_or_else(|_| Err(Error::InstallFailed("installer panicked".to_string())));

                let outcome = match result {
                    Ok(()) => {
                        info!("Install finished.");
                        notifier.install_success();
                        InstallState::Succeeded
                    }
                    Err(Error::InstallCancelled) => {
                        info!("Install cancelled.");
                        InstallState::Cancelled
                    }
                    Err(e) => {
                        let message = match e {
                            Error::InstallFailed(message) => message,
                            other => other.to_string(),
                        };
                        error!("Install failed: {}", message);
                        notifier.install_failure(Some(&message));
                        InstallState::Failed
                    }
                };
                *state.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                self.job = Some(Job {
                    handle,
                    token,
                    done,
                });
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = InstallState::Idle;
                Err(e.into())
            }
        }
    }

    /// Asks the running job to stop without waiting for it.
    pub fn request_cancel(&self) {
        if !self.is_alive() {
            return;
        }
        if let Some(job) = &self.job {
            debug!("Cancellation requested.");
            job.token.cancel();
        }
    }

    /// Cancels the running job and blocks until it has stopped.
    ///
    /// Returns immediately if nothing is running.
    pub fn cancel(&mut self) {
        if !self.is_alive() {
            return;
        }
        self.request_cancel();
        self.reap();
    }

    /// Cancels the running job, waiting at most `timeout` for it to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CancelTimedOut`] if the job is still running when the
    /// timeout expires. The job is kept and may be waited on again.
    pub fn cancel_timeout(&mut self, timeout: Duration) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.request_cancel();
        match self.wait_timeout(timeout) {
            Some(_) => Ok(()),
            None => {
                warn!("Install did not stop within {:?}.", timeout);
                Err(Error::CancelTimedOut)
            }
        }
    }

    /// Blocks until the current job has finished and returns its outcome.
    pub fn wait(&mut self) -> InstallState {
        self.reap();
        self.state()
    }

    /// Waits at most `timeout` for the current job. Returns `None` if it is
    /// still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<InstallState> {
        if let Some(job) = &self.job {
            match job.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => return None,
            }
        }
        Some(self.wait())
    }

    /// Joins the current job's thread, if any.
    fn reap(&mut self) {
        if let Some(job) = self.job.take() {
            if job.handle.join().is_err() {
                error!("Install thread panicked.");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}
