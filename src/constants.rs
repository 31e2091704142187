// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Name of the context the manager is built with
pub const DEFAULT_CONTEXT: &str = "default";

/// Scope used for resources created before any test scope is set
pub const GLOBAL_SCOPE: &str = "global";

/// Wait engine defaults
pub mod wait {
    use std::time::Duration;

    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(180);
    pub const DELETION_TIMEOUT: Duration = Duration::from_secs(180);
    /// Poll intervals at or above this escalate repeated errors after two occurrences
    pub const LONG_POLL_INTERVAL: Duration = Duration::from_secs(60);
    /// Concurrent evaluations allowed across all deferred waits
    pub const ASYNC_WAIT_WORKERS: usize = 16;
}

/// Readiness budgets for kinds that converge slowly
pub mod readiness {
    use std::time::Duration;

    pub const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(600);
    pub const SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(600);
}

/// Attempts for a replace that keeps hitting optimistic-concurrency conflicts
pub const REPLACE_RETRIES: u32 = 3;
