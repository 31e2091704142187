// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Handler for kinds that have a typed Rust representation.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, ServiceAccount};
use kube::api::{ApiResource, DynamicObject};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{object_name, ResourceType};
use crate::constants::readiness;
use crate::error::{HarnessError, Result};
use crate::types::subscription::Subscription;

/// Generic handler for a typed kind `K`, made ready by a predicate on the live object.
pub struct KubeResourceType<K> {
    api_resource: ApiResource,
    namespaced: bool,
    readiness: fn(&K) -> bool,
    readiness_timeout: Option<Duration>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeResourceType<K>
where
    K: Resource<DynamicType = ()>,
{
    pub fn namespace_scoped(readiness: fn(&K) -> bool) -> Self {
        Self::build(true, readiness)
    }

    pub fn cluster_scoped(readiness: fn(&K) -> bool) -> Self {
        Self::build(false, readiness)
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = Some(timeout);
        self
    }

    fn build(namespaced: bool, readiness: fn(&K) -> bool) -> Self {
        Self {
            api_resource: ApiResource::erase::<K>(&()),
            namespaced,
            readiness,
            readiness_timeout: None,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> ResourceType for KubeResourceType<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout
    }

    async fn is_ready(&self, client: &Client, resource: &DynamicObject) -> Result<bool> {
        let name = object_name(resource)?;
        let Some(live) = self
            .get(client, resource.metadata.namespace.as_deref(), name)
            .await?
        else {
            return Ok(false);
        };

        let typed: K = live.try_parse().map_err(|e| {
            HarnessError::InvalidResource(format!("{} {}: {}", self.kind(), name, e))
        })?;
        Ok((self.readiness)(&typed))
    }
}

fn exists<K>(_: &K) -> bool {
    true
}

pub fn namespace_type() -> KubeResourceType<Namespace> {
    KubeResourceType::cluster_scoped(|ns| {
        ns.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Active")
    })
}

pub fn service_account_type() -> KubeResourceType<ServiceAccount> {
    KubeResourceType::namespace_scoped(exists)
}

pub fn config_map_type() -> KubeResourceType<ConfigMap> {
    KubeResourceType::namespace_scoped(exists)
}

pub fn secret_type() -> KubeResourceType<Secret> {
    KubeResourceType::namespace_scoped(exists)
}

pub fn deployment_type() -> KubeResourceType<Deployment> {
    KubeResourceType::namespace_scoped(is_deployment_ready)
        .with_readiness_timeout(readiness::DEPLOYMENT_TIMEOUT)
}

pub fn subscription_type() -> KubeResourceType<Subscription> {
    KubeResourceType::namespace_scoped(is_subscription_ready)
        .with_readiness_timeout(readiness::SUBSCRIPTION_TIMEOUT)
}

fn is_subscription_ready(subscription: &Subscription) -> bool {
    if let Some(failure) = subscription.failure() {
        debug!(
            subscription = ?subscription.metadata.name,
            condition = %failure.condition_type,
            reason = ?failure.reason,
            message = ?failure.message,
            "Subscription is not progressing"
        );
    }
    subscription.is_ready()
}

fn is_deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    let generation_observed = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    };
    generation_observed
        && status.updated_replicas.unwrap_or(0) >= desired
        && status.available_replicas.unwrap_or(0) >= desired
}
