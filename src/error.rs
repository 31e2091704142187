// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::resources::ResourceRef;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("No resource type registered for kind '{0}'")]
    UnknownResourceKind(String),

    #[error("No cluster context named '{0}'")]
    UnknownContext(String),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error("Timeout after {timeout:?} waiting for {description}")]
    ConvergenceTimeout {
        description: String,
        timeout: Duration,
    },

    #[error("Ready check failed while waiting for {description}: {message}")]
    PredicateFailed { description: String, message: String },

    #[error("Wait for {0} was abandoned before it completed")]
    WaitAbandoned(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} resource(s) could not be cleaned up:\n{}", .0.len(), TeardownReport(.0))]
    TeardownAggregateFailure(Vec<TeardownFailure>),
}

impl HarnessError {
    /// Map an API status error onto the classified variants, keeping anything else as-is.
    pub fn classify(error: kube::Error, what: impl fmt::Display) -> Self {
        match error {
            kube::Error::Api(ref response) => match (response.code, response.reason.as_str()) {
                (409, "AlreadyExists") => Self::AlreadyExists(format!("{what}: {}", response.message)),
                (409, _) => Self::Conflict(format!("{what}: {}", response.message)),
                (404, _) => Self::NotFound(format!("{what}: {}", response.message)),
                (400 | 422, _) => Self::InvalidResource(format!("{what}: {}", response.message)),
                _ => Self::Kube(error),
            },
            _ => Self::Kube(error),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A single teardown entry that could not be removed during a cleanup sweep.
#[derive(Debug)]
pub struct TeardownFailure {
    pub resource: ResourceRef,
    pub error: HarnessError,
}

struct TeardownReport<'a>(&'a [TeardownFailure]);

impl fmt::Display for TeardownReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}: {}", failure.resource, failure.error)?;
        }
        Ok(())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
