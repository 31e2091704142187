// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use crate::constants::wait::LONG_POLL_INTERVAL;

/// Tracks repeated ready-check errors and decides when one is worth logging loudly.
///
/// An error is escalated once, after the same message has been seen `threshold`
/// times in a row. Short poll intervals need more repetitions before escalating.
#[derive(Debug)]
pub(crate) struct ErrorDebouncer {
    threshold: u32,
    last_message: Option<String>,
    occurrences: u32,
    escalated: bool,
}

impl ErrorDebouncer {
    pub(crate) fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            threshold: escalation_threshold(poll_interval, timeout),
            last_message: None,
            occurrences: 0,
            escalated: false,
        }
    }

    /// Record an error message; returns true the one time it should be escalated.
    pub(crate) fn observe(&mut self, message: &str) -> bool {
        if self.last_message.as_deref() == Some(message) {
            self.occurrences += 1;
        } else {
            self.last_message = Some(message.to_owned());
            self.occurrences = 1;
        }

        if !self.escalated && self.occurrences >= self.threshold {
            self.escalated = true;
            return true;
        }
        false
    }

    pub(crate) fn occurrences(&self) -> u32 {
        self.occurrences
    }

    pub(crate) fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }
}

/// Two repetitions for slow polls, otherwise a quarter of the expected iterations.
pub(crate) fn escalation_threshold(poll_interval: Duration, timeout: Duration) -> u32 {
    if poll_interval >= LONG_POLL_INTERVAL {
        return 2;
    }

    let iterations = timeout.as_millis() / poll_interval.as_millis().max(1);
    u32::try_from(iterations / 4).unwrap_or(u32::MAX).max(2)
}
