// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use kube::api::DynamicObject;
use tracing::debug;

use super::kube_type;
use super::{object_kind, ResourceType};
use crate::error::{HarnessError, Result};

/// Kind string to handler lookup.
///
/// Registering a kind that is already present replaces the previous handler,
/// which lets a test environment swap in its own implementations.
#[derive(Default)]
pub struct ResourceTypeRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ResourceType>>>,
}

impl ResourceTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with Namespace, ServiceAccount, ConfigMap, Secret,
    /// Deployment and Subscription
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(kube_type::namespace_type()));
        registry.register(Arc::new(kube_type::service_account_type()));
        registry.register(Arc::new(kube_type::config_map_type()));
        registry.register(Arc::new(kube_type::secret_type()));
        registry.register(Arc::new(kube_type::deployment_type()));
        registry.register(Arc::new(kube_type::subscription_type()));
        registry
    }

    /// Add `handler` under its kind, returning the handler it replaced
    pub fn register(&self, handler: Arc<dyn ResourceType>) -> Option<Arc<dyn ResourceType>> {
        let kind = handler.kind().to_string();
        debug!(kind = %kind, "Registering resource type");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler)
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn ResourceType>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownResourceKind(kind.to_string()))
    }

    /// Resolve the handler for the kind an object declares
    pub fn resolve_for(&self, resource: &DynamicObject) -> Result<Arc<dyn ResourceType>> {
        self.resolve(object_kind(resource)?)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }
}
