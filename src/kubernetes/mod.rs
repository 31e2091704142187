// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster connections used by the lifecycle manager.

pub mod context;

pub use context::ClusterContext;
