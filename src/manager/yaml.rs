// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use kube::api::DynamicObject;
use tracing::debug;

use super::tracking::TestScope;
use crate::error::Result;
use crate::resources::ResourceRef;

/// Write `object` to `<dir>/<scope>/<Kind>-<namespace>-<name>.yaml`
pub(crate) async fn store(
    dir: &Path,
    scope: &TestScope,
    reference: &ResourceRef,
    object: &DynamicObject,
) -> Result<PathBuf> {
    let scope_dir = dir.join(sanitize(scope.as_str()));
    tokio::fs::create_dir_all(&scope_dir).await?;

    let path = scope_dir.join(file_name(reference));
    let yaml = serde_yaml::to_string(object)?;
    tokio::fs::write(&path, yaml).await?;

    debug!(path = %path.display(), "Stored resource snapshot");
    Ok(path)
}

fn file_name(reference: &ResourceRef) -> String {
    let stem = match &reference.namespace {
        Some(ns) => format!("{}-{}-{}", reference.kind, ns, reference.name),
        None => format!("{}-{}", reference.kind, reference.name),
    };
    format!("{}.yaml", sanitize(&stem))
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
