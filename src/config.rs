// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants;

/// Harness configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between two evaluations of a ready check
    pub poll_interval: Duration,
    /// Default budget for a created resource to become ready
    pub readiness_timeout: Duration,
    /// Default budget for a deleted resource to disappear
    pub deletion_timeout: Duration,
    /// Whether teardown waits for deletions concurrently
    pub async_deletion: bool,
    pub async_wait_workers: usize,
    pub replace_retries: u32,
    /// Directory receiving YAML snapshots of every created resource
    pub store_yaml_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: constants::wait::POLL_INTERVAL,
            readiness_timeout: constants::wait::READINESS_TIMEOUT,
            deletion_timeout: constants::wait::DELETION_TIMEOUT,
            async_deletion: true,
            async_wait_workers: constants::wait::ASYNC_WAIT_WORKERS,
            replace_retries: constants::REPLACE_RETRIES,
            store_yaml_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let poll_interval = parse::<u64>(&lookup, "TESTFRAME_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let readiness_timeout = parse::<u64>(&lookup, "TESTFRAME_READINESS_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.readiness_timeout);
        let deletion_timeout = parse::<u64>(&lookup, "TESTFRAME_DELETION_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.deletion_timeout);
        let async_deletion = parse::<bool>(&lookup, "TESTFRAME_ASYNC_DELETION")?
            .unwrap_or(defaults.async_deletion);
        let async_wait_workers = parse::<usize>(&lookup, "TESTFRAME_ASYNC_WAIT_WORKERS")?
            .unwrap_or(defaults.async_wait_workers);
        let replace_retries = parse::<u32>(&lookup, "TESTFRAME_REPLACE_RETRIES")?
            .unwrap_or(defaults.replace_retries);
        let store_yaml_dir = lookup("TESTFRAME_STORE_YAML_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        anyhow::ensure!(!poll_interval.is_zero(), "TESTFRAME_POLL_INTERVAL_MS must be greater than zero");
        anyhow::ensure!(async_wait_workers > 0, "TESTFRAME_ASYNC_WAIT_WORKERS must be greater than zero");

        Ok(Config {
            poll_interval,
            readiness_timeout,
            deletion_timeout,
            async_deletion,
            async_wait_workers,
            replace_retries,
            store_yaml_dir,
        })
    }
}

fn parse<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value '{raw}'"))
        })
        .transpose()
}
