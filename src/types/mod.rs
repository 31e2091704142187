// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed representations of custom resources the harness knows how to drive.

pub mod subscription;
