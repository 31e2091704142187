// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::debounce::ErrorDebouncer;
use super::deferred::{self, WaitHandle, WaitPool};
use super::Probe;
use crate::constants;
use crate::error::{HarnessError, Result};

/// Builder for a single bounded wait
pub struct Wait {
    pub(super) description: String,
    pub(super) poll_interval: Duration,
    pub(super) timeout: Duration,
    pub(super) on_timeout: Option<Box<dyn FnOnce() + Send>>,
    pub(super) cancel: Option<CancellationToken>,
    pub(super) pool: Option<WaitPool>,
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("description", &self.description)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Wait {
    /// Default poll interval: 1 second. Default timeout: 180 seconds.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            poll_interval: constants::wait::POLL_INTERVAL,
            timeout: constants::wait::READINESS_TIMEOUT,
            on_timeout: None,
            cancel: None,
            pool: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        // A zero interval would turn the loop into a busy spin
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `hook` once, right before a timeout error is returned
    pub fn on_timeout(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(hook));
        self
    }

    /// Stop waiting (without an error) once `token` is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run deferred evaluations on `pool` instead of the process-wide one
    pub fn pool(mut self, pool: WaitPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Evaluate `ready_check` on the calling task until it is ready or the deadline passes.
    ///
    /// Always evaluates at least once. Errors from the check count as "not ready";
    /// an error that keeps repeating is logged once at error level. Cancellation
    /// through [`Wait::cancel_on`] returns `Ok(())` without further evaluations.
    pub async fn until<F, Fut>(mut self, mut ready_check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe>,
    {
        let start = Instant::now();
        // No deadline when the timeout is too large to represent
        let deadline = start.checked_add(self.timeout);
        let mut debouncer = ErrorDebouncer::new(self.poll_interval, self.timeout);

        loop {
            match ready_check().await {
                Probe::Ready => {
                    debug!(
                        description = %self.description,
                        elapsed = ?start.elapsed(),
                        "Condition met"
                    );
                    return Ok(());
                }
                Probe::NotReady => {}
                Probe::Transient(err) => {
                    let message = format!("{err:#}");
                    if debouncer.observe(&message) {
                        error!(
                            description = %self.description,
                            occurrences = debouncer.occurrences(),
                            "Repeated error while waiting: {:?}",
                            err
                        );
                    } else {
                        debug!(description = %self.description, error = %message, "Ready check failed");
                    }
                }
            }

            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if left == Some(Duration::ZERO) {
                if let Some(last) = debouncer.last_message() {
                    warn!(description = %self.description, last_error = %last, "Wait timed out");
                }
                if let Some(hook) = self.on_timeout.take() {
                    hook();
                }
                return Err(HarnessError::ConvergenceTimeout {
                    description: self.description,
                    timeout: self.timeout,
                });
            }

            let pause = left.map_or(self.poll_interval, |left| self.poll_interval.min(left));
            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(description = %self.description, "Wait cancelled");
                            return Ok(());
                        }
                        _ = sleep(pause) => {}
                    }
                }
                None => sleep(pause).await,
            }
        }
    }

    /// Schedule evaluations of `ready_check` on the worker pool and return immediately.
    ///
    /// The first evaluation happens one poll interval from now. The handle resolves
    /// when the check reports ready, when the deadline passes, or with the first
    /// error the check returns. Dropping the handle stops further evaluations.
    pub fn until_async<F, Fut>(self, ready_check: F) -> WaitHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Probe> + Send + 'static,
    {
        deferred::spawn(self, ready_check)
    }
}
