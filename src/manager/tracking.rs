// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;

use kube::api::DynamicObject;

use crate::constants::GLOBAL_SCOPE;
use crate::resources::{ResourceHandle, ResourceRef};

/// The test unit a tracked resource belongs to.
///
/// Sweeping one scope never touches entries recorded under another, so a per-method
/// sweep leaves resources created for the whole class in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestScope(String);

impl TestScope {
    pub fn global() -> Self {
        Self(GLOBAL_SCOPE.to_string())
    }

    /// Scope spanning every test of a class or suite
    pub fn class(class: &str) -> Self {
        Self(class.to_string())
    }

    /// Scope of a single test
    pub fn method(class: &str, method: &str) -> Self {
        Self(format!("{}.{}", class, method))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TestScope {
    fn default() -> Self {
        Self::global()
    }
}

impl From<&str> for TestScope {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for TestScope {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for TestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tracked creation, undone by deleting `reference`
#[derive(Debug, Clone)]
pub struct LifecycleEntry {
    pub id: u64,
    pub scope: TestScope,
    pub reference: ResourceRef,
    pub snapshot: Option<DynamicObject>,
}

impl LifecycleEntry {
    pub fn handle(&self) -> Option<ResourceHandle> {
        self.snapshot.clone().map(|snapshot| ResourceHandle {
            reference: self.reference.clone(),
            snapshot,
        })
    }
}

/// Arena of tracked entries in creation order.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    entries: Vec<LifecycleEntry>,
    next_id: u64,
}

impl Tracker {
    /// Record `reference` under `scope`. Returns false, refreshing the snapshot instead,
    /// when the resource is already tracked in any scope.
    pub fn track(
        &mut self,
        scope: &TestScope,
        reference: ResourceRef,
        snapshot: Option<DynamicObject>,
    ) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.reference == reference) {
            if snapshot.is_some() {
                existing.snapshot = snapshot;
            }
            return false;
        }

        self.next_id += 1;
        self.entries.push(LifecycleEntry {
            id: self.next_id,
            scope: scope.clone(),
            reference,
            snapshot,
        });
        true
    }

    pub fn refresh(&mut self, reference: &ResourceRef, snapshot: DynamicObject) -> bool {
        match self.entries.iter_mut().find(|e| &e.reference == reference) {
            Some(entry) => {
                entry.snapshot = Some(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn untrack(&mut self, reference: &ResourceRef) -> Option<LifecycleEntry> {
        let index = self.entries.iter().position(|e| &e.reference == reference)?;
        Some(self.entries.remove(index))
    }

    /// Remove and return every entry of `scope`, oldest first
    pub fn drain(&mut self, scope: &TestScope) -> Vec<LifecycleEntry> {
        let (drained, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| &e.scope == scope);
        self.entries = kept;
        drained
    }

    pub fn entries(&self, scope: &TestScope) -> Vec<LifecycleEntry> {
        self.entries
            .iter()
            .filter(|e| &e.scope == scope)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(name: &str) -> ResourceRef {
        ResourceRef::new("ConfigMap", Some("default"), name, "default")
    }

    fn snapshot(value: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cm", "namespace": "default" },
            "data": { "key": value }
        }))
        .unwrap()
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(TestScope::default().as_str(), "global");
        assert_eq!(TestScope::class("Suite").to_string(), "Suite");
        assert_eq!(TestScope::method("Suite", "creates").to_string(), "Suite.creates");
        assert_eq!(TestScope::from("custom"), TestScope::class("custom"));
    }

    #[test]
    fn test_track_assigns_increasing_ids() {
        let mut tracker = Tracker::default();
        let scope = TestScope::global();

        assert!(tracker.track(&scope, cm("a"), None));
        assert!(tracker.track(&scope, cm("b"), None));

        let ids: Vec<u64> = tracker.entries(&scope).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_track_is_unique_across_scopes() {
        let mut tracker = Tracker::default();

        assert!(tracker.track(&TestScope::class("Suite"), cm("a"), Some(snapshot("1"))));
        assert!(!tracker.track(&TestScope::method("Suite", "t"), cm("a"), Some(snapshot("2"))));

        let entries = tracker.entries(&TestScope::class("Suite"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].snapshot.as_ref().unwrap().data["data"]["key"], "2");
        assert!(tracker.entries(&TestScope::method("Suite", "t")).is_empty());
    }

    #[test]
    fn test_drain_only_takes_scope() {
        let mut tracker = Tracker::default();
        let class = TestScope::class("Suite");
        let method = TestScope::method("Suite", "t");
        tracker.track(&class, cm("outer"), None);
        tracker.track(&method, cm("inner-1"), None);
        tracker.track(&method, cm("inner-2"), None);

        let drained: Vec<String> = tracker
            .drain(&method)
            .into_iter()
            .map(|e| e.reference.name)
            .collect();

        assert_eq!(drained, vec!["inner-1", "inner-2"]);
        let remaining = tracker.entries(&class);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].reference, cm("outer"));
        assert!(tracker.entries(&method).is_empty());
    }

    #[test]
    fn test_untrack_and_refresh() {
        let mut tracker = Tracker::default();
        let scope = TestScope::global();
        tracker.track(&scope, cm("a"), None);

        assert!(tracker.refresh(&cm("a"), snapshot("x")));
        assert!(tracker.entries(&scope)[0].handle().is_some());
        assert!(!tracker.refresh(&cm("missing"), snapshot("x")));

        assert_eq!(tracker.untrack(&cm("a")).map(|e| e.id), Some(1));
        assert!(tracker.untrack(&cm("a")).is_none());
    }
}
