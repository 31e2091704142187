// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource lifecycle harness for tests that drive a live Kubernetes cluster.
//!
//! Tests create resources through a [`ResourceManager`], which waits for each to
//! converge and removes everything a test scope created, newest first, when the
//! scope is swept.

pub mod config;
pub mod constants;
pub mod error;
pub mod kubernetes;
pub mod logging;
pub mod manager;
pub mod resources;
pub mod types;
pub mod wait;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{HarnessError, Result};
pub use kubernetes::ClusterContext;
pub use manager::{ResourceManager, TestScope, WaitSettings};
pub use resources::{
    to_dynamic, KubeResourceType, ResourceCondition, ResourceHandle, ResourceRef, ResourceType,
    ResourceTypeRegistry,
};
pub use wait::{Probe, Wait, WaitHandle};
