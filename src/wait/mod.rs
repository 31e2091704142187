// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bounded polling until a ready check converges.
//!
//! Two flavours share the same readiness and deadline rules:
//!
//! - [`Wait::until`] evaluates in-line on the calling task, debouncing repeated
//!   ready-check errors so a tight poll loop does not flood the log.
//! - [`Wait::until_async`] schedules every evaluation on the shared [`WaitPool`]
//!   and hands back a [`WaitHandle`]; the first ready-check error fails it.
//!
//! ```ignore
//! use testframe::wait::{Probe, Wait};
//!
//! Wait::new("namespace test to become Active")
//!     .poll_interval(Duration::from_millis(500))
//!     .timeout(Duration::from_secs(30))
//!     .until(|| async { Probe::from(namespace_is_active().await) })
//!     .await?;
//! ```

mod debounce;
mod deferred;
mod engine;

pub use deferred::{WaitHandle, WaitPool};
pub use engine::Wait;

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Outcome of a single ready-check evaluation
#[derive(Debug)]
pub enum Probe {
    Ready,
    NotReady,
    /// The check itself failed; counts as not ready for in-line waits
    Transient(anyhow::Error),
}

impl Probe {
    pub fn is_ready(&self) -> bool {
        matches!(self, Probe::Ready)
    }
}

impl From<bool> for Probe {
    fn from(ready: bool) -> Self {
        if ready {
            Probe::Ready
        } else {
            Probe::NotReady
        }
    }
}

impl<E> From<std::result::Result<bool, E>> for Probe
where
    E: Into<anyhow::Error>,
{
    fn from(result: std::result::Result<bool, E>) -> Self {
        match result {
            Ok(ready) => ready.into(),
            Err(e) => Probe::Transient(e.into()),
        }
    }
}

/// Poll `ready_check` in-line until it reports ready or `timeout` elapses.
pub async fn until<F, Fut>(
    description: &str,
    poll_interval: Duration,
    timeout: Duration,
    ready_check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    Wait::new(description)
        .poll_interval(poll_interval)
        .timeout(timeout)
        .until(ready_check)
        .await
}

/// Poll `ready_check` on the shared worker pool without blocking the caller.
pub fn until_async<F, Fut>(
    description: &str,
    poll_interval: Duration,
    timeout: Duration,
    ready_check: F,
) -> WaitHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Probe> + Send + 'static,
{
    Wait::new(description)
        .poll_interval(poll_interval)
        .timeout(timeout)
        .until_async(ready_check)
}
