// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use super::tracking::TestScope;

tokio::task_local! {
    static FRAME: Frame;
}

/// Cluster context and test scope in effect while a future is polled.
///
/// A frame is only visible to the future it was entered with. Two futures joined on the
/// same task each see their own frame, and a task moving between worker threads keeps it.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    manager: u64,
    pub context: Option<String>,
    pub scope: Option<TestScope>,
}

impl Frame {
    /// Frame of `manager` entered by the caller, if any
    pub fn current(manager: u64) -> Option<Self> {
        FRAME
            .try_with(Frame::clone)
            .ok()
            .filter(|frame| frame.manager == manager)
    }

    /// Caller's frame of `manager`, or an empty one to build on
    pub fn inherit(manager: u64) -> Self {
        Self::current(manager).unwrap_or(Self {
            manager,
            context: None,
            scope: None,
        })
    }

    pub fn with_context(mut self, name: &str) -> Self {
        self.context = Some(name.to_string());
        self
    }

    pub fn with_scope(mut self, scope: TestScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Poll `fut` inside this frame. The caller's frame is back in effect as soon as
    /// `fut` completes, panics or is dropped.
    pub async fn enter<F: Future>(self, fut: F) -> F::Output {
        FRAME.scope(self, fut).await
    }

    pub fn enter_blocking<R>(self, f: impl FnOnce() -> R) -> R {
        FRAME.sync_scope(self, f)
    }
}

/// Distinguishes frames of different managers sharing a task
pub(crate) fn next_manager_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
