// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Subscription state reported once the operator has installed the newest CSV of its channel
pub const AT_LATEST_KNOWN: &str = "AtLatestKnown";

/// Condition types OLM sets when a subscription cannot make progress
const FAILURE_CONDITIONS: [&str; 3] = [
    "ResolutionFailed",
    "InstallPlanFailed",
    "CatalogSourcesUnhealthy",
];

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "Subscription")]
#[kube(namespaced)]
#[kube(status = "SubscriptionStatus")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Package name in the catalog
    pub name: String,
    pub source: String,
    pub source_namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<String>,
}

impl Subscription {
    /// Check if the subscription has converged on the latest known CSV
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            == Some(AT_LATEST_KNOWN)
    }

    /// The CSV the operator reports as installed, if any
    pub fn installed_csv(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.installed_csv.as_deref())
    }

    /// First active condition explaining why the subscription is stuck
    pub fn failure(&self) -> Option<&SubscriptionCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| {
                conditions.iter().find(|c| {
                    c.status == "True" && FAILURE_CONDITIONS.contains(&c.condition_type.as_str())
                })
            })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    #[serde(rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<SubscriptionCondition>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
pub struct SubscriptionCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
