// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::sync::Arc;

use kube::api::DynamicObject;

type Predicate = Arc<dyn Fn(&DynamicObject) -> bool + Send + Sync>;

/// A state a tracked resource can be waited into
#[derive(Clone)]
pub enum ResourceCondition {
    /// The handler's own readiness check
    Ready,
    /// The object is gone from the cluster
    Deleted,
    /// A named predicate over the live object; an absent object never satisfies it
    Custom { name: String, predicate: Predicate },
}

impl ResourceCondition {
    pub fn ready() -> Self {
        Self::Ready
    }

    pub fn deletion() -> Self {
        Self::Deleted
    }

    pub fn custom(
        name: impl Into<String>,
        predicate: impl Fn(&DynamicObject) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ready => "readiness",
            Self::Deleted => "deletion",
            Self::Custom { name, .. } => name,
        }
    }
}

impl fmt::Debug for ResourceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceCondition").field(&self.name()).finish()
    }
}
