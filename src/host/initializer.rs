//! One-time bring-up of the execution host.
//!
//! [`HostInitializer`] serialises calls to [`ExecutionHost::ensure_started`] and caches the
//! handle of the first successful one.

use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        OnceLock,
    },
};

use parking_lot::ReentrantMutex;
use tracing::{info, warn};

use crate::{
    activation::Target,
    host::{ExecutionHost, HostError, HostHandle, ResolveRequest},
    Error, Result,
};

#[derive(Default)]
struct BringUp {
    in_progress: bool,
    last_failure: Option<HostError>,
}

/// Process-wide gate around [`ExecutionHost::ensure_started`].
///
/// Guarantees:
/// - at most one bring-up attempt is in flight at any time;
/// - after a successful attempt the handle is cached and the host is never started again;
/// - a failed attempt is reported to the caller that ran it and to every caller that was
///   blocked on it;
/// - a thread that re-enters while it is itself starting the host gets
///   [`Error::ReentrantBringUp`] instead of deadlocking.
///
/// Whether a *later* caller retries after a failure, or replays the cached failure, is decided
/// by the retry flag.
pub struct HostInitializer {
    host: Box<dyn ExecutionHost>,
    handle: OnceLock<HostHandle>,
    gate: ReentrantMutex<RefCell<BringUp>>,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    retry_failed: bool,
}

impl HostInitializer {
    /// Wraps `host`.
    ///
    /// # Arguments
    /// * `host` - The execution host to start on first demand
    /// * `retry_failed` - Start a fresh attempt for callers arriving after a failure, instead
    ///   of replaying that failure forever
    pub fn new(host: impl ExecutionHost + 'static, retry_failed: bool) -> HostInitializer {
        HostInitializer {
            host: Box::new(host),
            handle: OnceLock::new(),
            gate: ReentrantMutex::new(RefCell::new(BringUp::default())),
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            retry_failed,
        }
    }

    /// Returns the host handle, starting the host if it is not running yet.
    ///
    /// Lock-free once the host is up.
    ///
    /// # Errors
    /// - [`Error::HostBringUpFailed`] if this caller's attempt, or the attempt it waited on,
    ///   failed; also for every caller after a failure when retries are disabled
    /// - [`Error::ReentrantBringUp`] if called on the thread that is currently starting the host
    pub fn ensure_host(&self) -> Result<HostHandle> {
        self.ensure_host_after(self.failures())
    }

    // Number of failed attempts so far, sampled by callers before they block.
    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// [`HostInitializer::ensure_host`] for a caller that sampled [`HostInitializer::failures`]
    /// before blocking elsewhere, e.g. on a module lock. An attempt that failed since then is
    /// reported to it rather than retried.
    pub(crate) fn ensure_host_after(&self, failures_seen: usize) -> Result<HostHandle> {
        if let Some(handle) = self.handle.get() {
            return Ok(*handle);
        }

        let gate = self.gate.lock();

        if let Some(handle) = self.handle.get() {
            return Ok(*handle);
        }

        {
            let state = gate.borrow();
            if state.in_progress {
                warn!("execution host bring-up re-entered on the same thread");
                return Err(Error::ReentrantBringUp);
            }

            if let Some(failure) = &state.last_failure {
                let failed_while_waiting = self.failures() != failures_seen;
                if failed_while_waiting || !self.retry_failed {
                    return Err(Error::HostBringUpFailed(failure.clone()));
                }
            }
        }

        gate.borrow_mut().in_progress = true;
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt, "starting execution host");

        // The gate is held but not borrowed, the host may call back in
        let result = self.host.ensure_started();

        let mut state = gate.borrow_mut();
        state.in_progress = false;

        match result {
            Ok(handle) => {
                let handle = *self.handle.get_or_init(|| handle);
                state.last_failure = None;
                info!(attempt, ?handle, "execution host started");
                Ok(handle)
            }
            Err(error) => {
                warn!(attempt, %error, "execution host bring-up failed");
                state.last_failure = Some(error.clone());
                self.failures.fetch_add(1, Ordering::Release);
                Err(Error::HostBringUpFailed(error))
            }
        }
    }

    /// The handle of the running host, `None` before a successful bring-up.
    #[must_use]
    pub fn handle(&self) -> Option<HostHandle> {
        self.handle.get().copied()
    }

    /// Returns `true` once the host has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Number of bring-up attempts made so far, successful or not.
    #[must_use]
    pub fn bring_up_attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// The failure of the most recent attempt, cleared by a successful one.
    #[must_use]
    pub fn last_failure(&self) -> Option<HostError> {
        self.gate.lock().borrow().last_failure.clone()
    }

    pub(crate) fn resolve(
        &self,
        handle: HostHandle,
        request: &ResolveRequest,
    ) -> std::result::Result<Target, HostError> {
        self.host.resolve(handle, request)
    }
}
