// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Tracking, convergence and teardown of the resources a test creates.
//!
//! A [`ResourceManager`] is built once per test process and shared by reference.
//! Every creation is recorded under the caller's [`TestScope`] and undone in reverse
//! order by [`ResourceManager::delete_resources`]. The active cluster context and the
//! test scope belong to the future they were entered with
//! ([`ResourceManager::use_context`], [`ResourceManager::with_test_context`]), so tests
//! running concurrently on one runtime do not see each other's state.

mod context;
mod teardown;
mod tracking;
mod yaml;

pub use tracking::{LifecycleEntry, TestScope};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use kube::api::DynamicObject;
use kube::Client;
use tracing::{debug, info, instrument, warn};

use self::context::{next_manager_id, Frame};
use self::tracking::Tracker;
use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::kubernetes::ClusterContext;
use crate::resources::{
    object_name, ResourceCondition, ResourceHandle, ResourceRef, ResourceType,
    ResourceTypeRegistry,
};
use crate::wait::{Probe, Wait, WaitHandle, WaitPool};

type CreateCallback = Arc<dyn Fn(&ResourceRef) + Send + Sync>;

/// Poll interval and budget for a single convergence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl WaitSettings {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }
}

enum Readiness {
    Skip,
    Default,
    With(WaitSettings),
}

struct PendingDeletion {
    reference: ResourceRef,
    handle: WaitHandle,
}

/// Handler, cluster and identity a single operation acts on
struct Target {
    handler: Arc<dyn ResourceType>,
    context: ClusterContext,
    reference: ResourceRef,
}

pub struct ResourceManager {
    id: u64,
    config: Config,
    registry: Arc<ResourceTypeRegistry>,
    contexts: RwLock<HashMap<String, ClusterContext>>,
    default_context: String,
    default_scope: Mutex<TestScope>,
    tracker: Mutex<Tracker>,
    pending: Mutex<HashMap<TestScope, Vec<PendingDeletion>>>,
    callbacks: RwLock<Vec<CreateCallback>>,
    pool: WaitPool,
}

impl ResourceManager {
    /// Manager whose default context is `context`, using the built-in resource kinds
    pub fn new(context: ClusterContext, config: Config) -> Self {
        let default_context = context.name().to_string();
        let pool = WaitPool::new(config.async_wait_workers);
        Self {
            id: next_manager_id(),
            config,
            registry: Arc::new(ResourceTypeRegistry::with_defaults()),
            contexts: RwLock::new(HashMap::from([(default_context.clone(), context)])),
            default_context,
            default_scope: Mutex::default(),
            tracker: Mutex::default(),
            pending: Mutex::default(),
            callbacks: RwLock::default(),
            pool,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ResourceTypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ResourceTypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Test scope

    /// Record subsequent creations under `scope` for callers outside any
    /// [`ResourceManager::with_test_context`] future.
    ///
    /// This is manager-wide: test units running concurrently on one manager use
    /// `with_test_context` instead.
    pub fn set_test_context(&self, scope: impl Into<TestScope>) {
        let scope = scope.into();
        if let Some(active) = Frame::current(self.id).and_then(|frame| frame.scope) {
            warn!(scope = %scope, active = %active, "Scope of the running future takes precedence");
        }
        debug!(scope = %scope, "Entering test scope");
        *self
            .default_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = scope;
    }

    /// Run `fut` with every creation and sweep it performs bound to `scope`
    pub async fn with_test_context<F: Future>(
        &self,
        scope: impl Into<TestScope>,
        fut: F,
    ) -> F::Output {
        let scope = scope.into();
        debug!(scope = %scope, "Entering test scope");
        Frame::inherit(self.id).with_scope(scope).enter(fut).await
    }

    pub fn test_context(&self) -> TestScope {
        Frame::current(self.id)
            .and_then(|frame| frame.scope)
            .unwrap_or_else(|| {
                self.default_scope
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
    }

    pub fn clear_test_context(&self) {
        self.set_test_context(TestScope::global());
    }

    // Cluster contexts

    /// Make `context` available to [`ResourceManager::use_context`], replacing one of the same name
    pub fn add_context(&self, context: ClusterContext) -> Option<ClusterContext> {
        info!(context = %context.name(), "Registering cluster context");
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.name().to_string(), context)
    }

    /// Run `fut` against the context named `name`.
    ///
    /// Only `fut` sees the switch. The caller's context is back in effect once it
    /// completes, fails, panics or is dropped.
    pub async fn use_context<F: Future>(&self, name: &str, fut: F) -> Result<F::Output> {
        self.context(name)?;
        debug!(context = %name, "Switched cluster context");
        Ok(Frame::inherit(self.id).with_context(name).enter(fut).await)
    }

    /// [`ResourceManager::use_context`] for synchronous code
    pub fn use_context_blocking<R>(&self, name: &str, f: impl FnOnce() -> R) -> Result<R> {
        self.context(name)?;
        debug!(context = %name, "Switched cluster context");
        Ok(Frame::inherit(self.id).with_context(name).enter_blocking(f))
    }

    pub fn current_context_name(&self) -> String {
        Frame::current(self.id)
            .and_then(|frame| frame.context)
            .unwrap_or_else(|| self.default_context.clone())
    }

    pub fn current_context(&self) -> Result<ClusterContext> {
        self.context(&self.current_context_name())
    }

    fn context(&self, name: &str) -> Result<ClusterContext> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownContext(name.to_string()))
    }

    /// Observe every successful creation
    pub fn add_create_callback(&self, callback: impl Fn(&ResourceRef) + Send + Sync + 'static) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    // Creation

    /// Create `resources` in order and wait for each to become ready
    pub async fn create_resource_with_wait(
        &self,
        resources: &[DynamicObject],
    ) -> Result<Vec<DynamicObject>> {
        self.create_resources(resources, Readiness::Default).await
    }

    pub async fn create_resource_with_timeout(
        &self,
        resources: &[DynamicObject],
        settings: WaitSettings,
    ) -> Result<Vec<DynamicObject>> {
        self.create_resources(resources, Readiness::With(settings))
            .await
    }

    pub async fn create_resource_without_wait(
        &self,
        resources: &[DynamicObject],
    ) -> Result<Vec<DynamicObject>> {
        self.create_resources(resources, Readiness::Skip).await
    }

    async fn create_resources(
        &self,
        resources: &[DynamicObject],
        readiness: Readiness,
    ) -> Result<Vec<DynamicObject>> {
        let scope = self.test_context();
        let context = self.current_context()?;

        let mut created = Vec::with_capacity(resources.len());
        for resource in resources {
            let target = self.target_in(resource, &context)?;
            info!(resource = %target.reference, context = %context.name(), "Creating resource");

            let object = target.handler.create(context.client(), resource).await?;
            self.record_creation(&scope, &target.reference, &object).await;
            if let Some(settings) = self.readiness_settings(target.handler.as_ref(), &readiness) {
                self.wait_ready(&target, &object, settings).await?;
            }
            created.push(object);
        }

        Ok(created)
    }

    /// Create `resource`, or bring the existing object in line with it, then wait for readiness.
    ///
    /// Calling this repeatedly for the same object leaves a single tracked entry.
    #[instrument(skip_all, fields(name = ?resource.metadata.name))]
    pub async fn create_or_update_resource_with_wait(
        &self,
        resource: &DynamicObject,
    ) -> Result<DynamicObject> {
        let scope = self.test_context();
        let target = self.target(resource)?;
        let client = target.context.client();

        let object = match target.handler.create(client, resource).await {
            Ok(object) => {
                info!(resource = %target.reference, "Created resource");
                self.record_creation(&scope, &target.reference, &object)
                    .await;
                object
            }
            Err(HarnessError::AlreadyExists(_)) => {
                info!(resource = %target.reference, "Resource exists, replacing it");
                let desired = resource.clone();
                let object = self
                    .replace_with_retries(&target, &move |live: &mut DynamicObject| {
                        adopt_desired_state(live, &desired)
                    })
                    .await?;
                self.track(&scope, &target.reference, &object);
                self.store_yaml(&scope, &target.reference, &object).await;
                object
            }
            Err(e) => return Err(e),
        };

        let readiness = self.readiness_settings(target.handler.as_ref(), &Readiness::Default);
        if let Some(settings) = readiness {
            self.wait_ready(&target, &object, settings).await?;
        }
        Ok(object)
    }

    /// Track a resource that was created outside the manager
    pub fn push_to_stack(&self, handle: ResourceHandle) {
        let scope = self.test_context();
        debug!(resource = %handle.reference, scope = %scope, "Tracking externally created resource");
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .track(&scope, handle.reference, Some(handle.snapshot));
    }

    // Updates

    pub async fn update_resource(&self, resource: &DynamicObject) -> Result<DynamicObject> {
        let target = self.target(resource)?;
        info!(resource = %target.reference, "Updating resource");

        let object = target
            .handler
            .update(target.context.client(), resource)
            .await?;
        self.refresh(&target.reference, &object).await;
        Ok(object)
    }

    /// Apply `edit` to the live object, retrying on conflicting writes, then wait for readiness
    pub async fn replace_resource(
        &self,
        resource: &DynamicObject,
        edit: impl Fn(&mut DynamicObject) + Send + Sync,
    ) -> Result<DynamicObject> {
        let target = self.target(resource)?;
        info!(resource = %target.reference, "Replacing resource");

        let object = self.replace_with_retries(&target, &edit).await?;
        self.refresh(&target.reference, &object).await;

        let readiness = self.readiness_settings(target.handler.as_ref(), &Readiness::Default);
        if let Some(settings) = readiness {
            self.wait_ready(&target, &object, settings).await?;
        }
        Ok(object)
    }

    async fn replace_with_retries(
        &self,
        target: &Target,
        edit: &(dyn Fn(&mut DynamicObject) + Send + Sync),
    ) -> Result<DynamicObject> {
        let attempts = self.config.replace_retries.max(1);
        let reference = &target.reference;
        let mut attempt = 1;
        loop {
            let result = target
                .handler
                .replace(
                    target.context.client(),
                    reference.namespace.as_deref(),
                    &reference.name,
                    edit,
                )
                .await;
            match result {
                Err(HarnessError::Conflict(message)) if attempt < attempts => {
                    warn!(resource = %reference, attempt, "Replace conflicted, retrying: {}", message);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // Waiting

    /// Wait until `resource` satisfies `condition`, using the manager defaults unless
    /// `settings` is given
    pub async fn wait_resource_condition(
        &self,
        resource: &DynamicObject,
        condition: &ResourceCondition,
        settings: Option<WaitSettings>,
    ) -> Result<()> {
        let target = self.target(resource)?;
        let settings = settings.unwrap_or_else(|| match condition {
            ResourceCondition::Deleted => self.deletion_settings(),
            _ => self.default_readiness(target.handler.as_ref()),
        });

        let handler = target.handler.as_ref();
        let client = target.context.client();
        let reference = &target.reference;
        Wait::new(format!("{} of {}", condition.name(), reference))
            .poll_interval(settings.poll_interval)
            .timeout(settings.timeout)
            .until(move || async move {
                let namespace = reference.namespace.as_deref();
                let outcome = match condition {
                    ResourceCondition::Ready => handler.is_ready(client, resource).await,
                    ResourceCondition::Deleted => {
                        handler.is_deleted(client, namespace, &reference.name).await
                    }
                    ResourceCondition::Custom { predicate, .. } => handler
                        .get(client, namespace, &reference.name)
                        .await
                        .map(|live| live.as_ref().is_some_and(|o| predicate(o))),
                };
                Probe::from(outcome)
            })
            .await
    }

    async fn wait_ready(
        &self,
        target: &Target,
        object: &DynamicObject,
        settings: WaitSettings,
    ) -> Result<()> {
        let handler = target.handler.as_ref();
        let client = target.context.client();
        let description = target.reference.to_string();

        Wait::new(format!("readiness of {}", description))
            .poll_interval(settings.poll_interval)
            .timeout(settings.timeout)
            .on_timeout(move || warn!(resource = %description, "Resource did not become ready"))
            .until(move || async move { Probe::from(handler.is_ready(client, object).await) })
            .await
    }

    fn readiness_settings(
        &self,
        handler: &dyn ResourceType,
        readiness: &Readiness,
    ) -> Option<WaitSettings> {
        match readiness {
            Readiness::Skip => None,
            Readiness::Default => Some(self.default_readiness(handler)),
            Readiness::With(settings) => Some(*settings),
        }
    }

    fn default_readiness(&self, handler: &dyn ResourceType) -> WaitSettings {
        WaitSettings::new(
            self.config.poll_interval,
            handler
                .readiness_timeout()
                .unwrap_or(self.config.readiness_timeout),
        )
    }

    fn deletion_settings(&self) -> WaitSettings {
        WaitSettings::new(self.config.poll_interval, self.config.deletion_timeout)
    }

    // Deletion

    /// Delete `resource` and wait until it is gone
    pub async fn delete_resource_with_wait(&self, resource: &DynamicObject) -> Result<()> {
        let target = self.target(resource)?;
        self.delete_target(&target).await?;
        self.untrack(&target.reference);
        self.wait_deleted(&target).await
    }

    /// Delete `resource` and return a handle that resolves once it is gone
    pub async fn delete_resource_with_async_wait(
        &self,
        resource: &DynamicObject,
    ) -> Result<WaitHandle> {
        let target = self.target(resource)?;
        self.delete_target(&target).await?;
        self.untrack(&target.reference);
        Ok(self.wait_deleted_async(target))
    }

    /// Delete `resource` without checking that the deletion took effect
    pub async fn delete_resource_without_wait(&self, resource: &DynamicObject) -> Result<()> {
        let target = self.target(resource)?;
        self.delete_target(&target).await?;
        self.untrack(&target.reference);
        Ok(())
    }

    /// Delete `resource`, waiting in-line or leaving the wait to the next sweep of this scope
    pub async fn decide_delete_wait_async(
        &self,
        resource: &DynamicObject,
        async_wait: bool,
    ) -> Result<()> {
        if !async_wait {
            return self.delete_resource_with_wait(resource).await;
        }

        let scope = self.test_context();
        let target = self.target(resource)?;
        self.delete_target(&target).await?;
        self.untrack(&target.reference);
        let reference = target.reference.clone();
        let handle = self.wait_deleted_async(target);

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope)
            .or_default()
            .push(PendingDeletion { reference, handle });
        Ok(())
    }

    /// Issue the delete call; an object that is already gone counts as deleted
    async fn delete_target(&self, target: &Target) -> Result<()> {
        let reference = &target.reference;
        info!(resource = %reference, context = %reference.context, "Deleting resource");
        match target
            .handler
            .delete(
                target.context.client(),
                reference.namespace.as_deref(),
                &reference.name,
            )
            .await
        {
            Err(e) if e.is_not_found() => {
                debug!(resource = %reference, "Resource already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn wait_deleted(&self, target: &Target) -> Result<()> {
        let settings = self.deletion_settings();
        let handler = target.handler.as_ref();
        let client = target.context.client();
        let reference = &target.reference;

        Wait::new(format!("deletion of {}", reference))
            .poll_interval(settings.poll_interval)
            .timeout(settings.timeout)
            .until(move || async move {
                Probe::from(
                    handler
                        .is_deleted(client, reference.namespace.as_deref(), &reference.name)
                        .await,
                )
            })
            .await
    }

    fn wait_deleted_async(&self, target: Target) -> WaitHandle {
        let settings = self.deletion_settings();
        let Target {
            handler,
            context,
            reference,
        } = target;
        let client = context.client().clone();

        Wait::new(format!("deletion of {}", reference))
            .poll_interval(settings.poll_interval)
            .timeout(settings.timeout)
            .pool(self.pool.clone())
            .until_async(move || {
                let handler = handler.clone();
                let client = client.clone();
                let reference = reference.clone();
                async move {
                    Probe::from(
                        handler
                            .is_deleted(&client, reference.namespace.as_deref(), &reference.name)
                            .await,
                    )
                }
            })
    }

    // Introspection

    /// Resources tracked in the caller's scope, oldest first
    pub fn tracked_resources(&self) -> Vec<LifecycleEntry> {
        let scope = self.test_context();
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries(&scope)
    }

    pub fn log_tracked_resources(&self) {
        let scope = self.test_context();
        let entries = self.tracked_resources();
        info!(scope = %scope, count = entries.len(), "Tracked resources");
        for entry in entries {
            info!(id = entry.id, resource = %entry.reference, context = %entry.reference.context, "  tracked");
        }
    }

    // Helpers

    fn target(&self, resource: &DynamicObject) -> Result<Target> {
        let context = self.current_context()?;
        self.target_in(resource, &context)
    }

    fn target_in(&self, resource: &DynamicObject, context: &ClusterContext) -> Result<Target> {
        let handler = self.registry.resolve_for(resource)?;
        let reference = reference_for(handler.as_ref(), resource, context)?;
        Ok(Target {
            handler,
            context: context.clone(),
            reference,
        })
    }

    async fn record_creation(
        &self,
        scope: &TestScope,
        reference: &ResourceRef,
        object: &DynamicObject,
    ) {
        self.track(scope, reference, object);

        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(reference);
        }

        self.store_yaml(scope, reference, object).await;
    }

    fn track(&self, scope: &TestScope, reference: &ResourceRef, object: &DynamicObject) {
        let added = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .track(scope, reference.clone(), Some(object.clone()));
        if added {
            debug!(resource = %reference, scope = %scope, "Tracking resource");
        }
    }

    async fn refresh(&self, reference: &ResourceRef, object: &DynamicObject) {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh(reference, object.clone());
        self.store_yaml(&self.test_context(), reference, object).await;
    }

    fn untrack(&self, reference: &ResourceRef) {
        if let Some(entry) = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .untrack(reference)
        {
            debug!(resource = %entry.reference, id = entry.id, "No longer tracking resource");
        }
    }

    async fn store_yaml(&self, scope: &TestScope, reference: &ResourceRef, object: &DynamicObject) {
        let Some(dir) = self.config.store_yaml_dir.as_deref() else {
            return;
        };
        if let Err(e) = yaml::store(dir, scope, reference, object).await {
            warn!(resource = %reference, "Failed to store resource YAML: {}", e);
        }
    }
}

/// Identity of `resource` as seen from `context`; namespaced kinds without a namespace
/// land in the client's default namespace
fn reference_for(
    handler: &dyn ResourceType,
    resource: &DynamicObject,
    context: &ClusterContext,
) -> Result<ResourceRef> {
    let namespace = if handler.is_namespaced() {
        Some(
            resource
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| default_namespace(context.client())),
        )
    } else {
        None
    };

    Ok(ResourceRef {
        kind: handler.kind().to_string(),
        namespace,
        name: object_name(resource)?.to_string(),
        context: context.name().to_string(),
    })
}

fn default_namespace(client: &Client) -> String {
    client.default_namespace().to_string()
}

/// Carry the desired payload, labels and annotations over onto the live object
fn adopt_desired_state(live: &mut DynamicObject, desired: &DynamicObject) {
    live.data = desired.data.clone();
    if desired.metadata.labels.is_some() {
        live.metadata.labels = desired.metadata.labels.clone();
    }
    if desired.metadata.annotations.is_some() {
        live.metadata.annotations = desired.metadata.annotations.clone();
    }
}
