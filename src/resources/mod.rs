// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource kinds the lifecycle manager can drive, and the registry that resolves them.

pub mod condition;
pub mod kube_type;
pub mod registry;

pub use condition::ResourceCondition;
pub use kube_type::KubeResourceType;
pub use registry::ResourceTypeRegistry;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams, TypeMeta};
use kube::{Client, Resource};
use serde::Serialize;

use crate::error::{HarnessError, Result};

/// In-place modification applied to the live object by [`ResourceType::replace`]
pub type EditFn<'a> = &'a (dyn Fn(&mut DynamicObject) + Send + Sync);

/// Identity of a tracked object: what it is, where it lives and which cluster holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub context: String,
}

impl ResourceRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
            context: context.into(),
        }
    }

    /// Read kind, namespace and name off an object that lives in `context`
    pub fn from_object(resource: &DynamicObject, context: &str) -> Result<Self> {
        Ok(Self {
            kind: object_kind(resource)?.to_string(),
            namespace: resource.metadata.namespace.clone(),
            name: object_name(resource)?.to_string(),
            context: context.to_string(),
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A tracked object together with its last-known state
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub reference: ResourceRef,
    pub snapshot: DynamicObject,
}

impl ResourceHandle {
    pub fn new(resource: DynamicObject, context: &str) -> Result<Self> {
        Ok(Self {
            reference: ResourceRef::from_object(&resource, context)?,
            snapshot: resource,
        })
    }
}

pub(crate) fn object_kind(resource: &DynamicObject) -> Result<&str> {
    resource
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .filter(|kind| !kind.is_empty())
        .ok_or_else(|| {
            HarnessError::InvalidResource(format!(
                "object '{}' does not declare a kind",
                resource.metadata.name.as_deref().unwrap_or("<unnamed>")
            ))
        })
}

pub(crate) fn object_name(resource: &DynamicObject) -> Result<&str> {
    resource.metadata.name.as_deref().ok_or_else(|| {
        HarnessError::InvalidResource("object must have metadata.name".to_string())
    })
}

/// Convert a typed object into the generic form the manager works with.
pub fn to_dynamic<K>(resource: &K) -> Result<DynamicObject>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut object: DynamicObject = serde_json::from_value(serde_json::to_value(resource)?)?;
    object.types = Some(TypeMeta {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
    });
    Ok(object)
}

/// Capability set the lifecycle manager needs for one resource kind.
///
/// Only the identity methods and [`ResourceType::is_ready`] are required; the CRUD
/// operations default to plain API calls through [`ResourceType::client_handle`].
/// Every call receives the client of the cluster context it should act on.
#[async_trait]
pub trait ResourceType: Send + Sync {
    /// Kind string this handler is registered under
    fn kind(&self) -> &str;

    fn api_resource(&self) -> &ApiResource;

    fn is_namespaced(&self) -> bool;

    /// Readiness budget for this kind, if it differs from the manager default
    fn readiness_timeout(&self) -> Option<Duration> {
        None
    }

    /// Dynamic API handle for this kind on `client`
    fn client_handle(&self, client: &Client, namespace: Option<&str>) -> Api<DynamicObject> {
        match (self.is_namespaced(), namespace) {
            (true, Some(ns)) => Api::namespaced_with(client.clone(), ns, self.api_resource()),
            (true, None) => Api::default_namespaced_with(client.clone(), self.api_resource()),
            (false, _) => Api::all_with(client.clone(), self.api_resource()),
        }
    }

    async fn create(&self, client: &Client, resource: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(resource)?;
        self.client_handle(client, resource.metadata.namespace.as_deref())
            .create(&PostParams::default(), resource)
            .await
            .map_err(|e| HarnessError::classify(e, format!("{} {}", self.kind(), name)))
    }

    async fn update(&self, client: &Client, resource: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(resource)?;
        self.client_handle(client, resource.metadata.namespace.as_deref())
            .replace(name, &PostParams::default(), resource)
            .await
            .map_err(|e| HarnessError::classify(e, format!("{} {}", self.kind(), name)))
    }

    async fn delete(&self, client: &Client, namespace: Option<&str>, name: &str) -> Result<()> {
        self.client_handle(client, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::classify(e, format!("{} {}", self.kind(), name)))
    }

    /// Fetch the live object, apply `edit` and write it back under its current resourceVersion
    async fn replace(
        &self,
        client: &Client,
        namespace: Option<&str>,
        name: &str,
        edit: EditFn<'_>,
    ) -> Result<DynamicObject> {
        let api = self.client_handle(client, namespace);
        let mut live = api
            .get(name)
            .await
            .map_err(|e| HarnessError::classify(e, format!("{} {}", self.kind(), name)))?;
        edit(&mut live);
        api.replace(name, &PostParams::default(), &live)
            .await
            .map_err(|e| HarnessError::classify(e, format!("{} {}", self.kind(), name)))
    }

    async fn get(
        &self,
        client: &Client,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.client_handle(client, namespace)
            .get_opt(name)
            .await
            .map_err(|e| HarnessError::classify(e, format!("{} {}", self.kind(), name)))
    }

    async fn is_ready(&self, client: &Client, resource: &DynamicObject) -> Result<bool>;

    async fn is_deleted(
        &self,
        client: &Client,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        Ok(self.get(client, namespace, name).await?.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_to_dynamic_sets_type_meta() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("settings".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
            ..Default::default()
        };

        let object = to_dynamic(&cm).unwrap();

        let types = object.types.as_ref().unwrap();
        assert_eq!(types.kind, "ConfigMap");
        assert_eq!(types.api_version, "v1");
        assert_eq!(object.data["data"]["key"], "value");
    }

    #[test]
    fn test_reference_from_object() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "creds", "namespace": "team-a" }
        }))
        .unwrap();

        let reference = ResourceRef::from_object(&object, "primary").unwrap();

        assert_eq!(reference, ResourceRef::new("Secret", Some("team-a"), "creds", "primary"));
        assert_eq!(reference.to_string(), "Secret team-a/creds");
    }

    #[test]
    fn test_reference_requires_kind_and_name() {
        let no_kind: DynamicObject = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "orphan" }
        }))
        .unwrap();
        assert!(matches!(
            ResourceRef::from_object(&no_kind, "primary"),
            Err(HarnessError::InvalidResource(_))
        ));

        let no_name: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {}
        }))
        .unwrap();
        assert!(matches!(
            ResourceRef::from_object(&no_name, "primary"),
            Err(HarnessError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_cluster_scoped_reference_display() {
        let reference = ResourceRef::new("Namespace", None, "test", "primary");
        assert_eq!(reference.to_string(), "Namespace test");
    }
}
