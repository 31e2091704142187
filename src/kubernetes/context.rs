// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Named cluster connections and the kubeconfig plumbing that produces them

use std::fmt;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KConfig};
use tracing::{debug, info, instrument};

use crate::error::{HarnessError, Result};

/// A named connection to one cluster.
///
/// Cloning is cheap; all clones share the underlying client.
#[derive(Clone)]
pub struct ClusterContext {
    name: String,
    client: Client,
}

impl ClusterContext {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Connect using the in-cluster environment or the local kubeconfig, whichever applies
    #[instrument(skip_all, fields(context = %name))]
    pub async fn infer(name: &str) -> Result<Self> {
        let config = KConfig::infer()
            .await
            .map_err(|e| HarnessError::Kubeconfig(format!("Failed to infer config: {}", e)))?;
        debug!("Inferred cluster URL {}", config.cluster_url);
        Self::from_config(name, config)
    }

    /// Connect through a named context of the local kubeconfig
    #[instrument(skip_all, fields(context = %kube_context))]
    pub async fn from_kubeconfig_context(name: &str, kube_context: &str) -> Result<Self> {
        let options = KubeConfigOptions {
            context: Some(kube_context.to_string()),
            ..Default::default()
        };
        let config = KConfig::from_kubeconfig(&options).await.map_err(|e| {
            HarnessError::Kubeconfig(format!(
                "Failed to load kubeconfig context '{}': {}",
                kube_context, e
            ))
        })?;
        Self::from_config(name, config)
    }

    /// Connect through the current context of a kubeconfig document
    pub async fn from_kubeconfig_yaml(name: &str, kubeconfig: &str) -> Result<Self> {
        let parsed = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| HarnessError::Kubeconfig(format!("Failed to parse kubeconfig: {}", e)))?;

        let config = KConfig::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| HarnessError::Kubeconfig(format!("Failed to create config: {}", e)))?;
        Self::from_config(name, config)
    }

    fn from_config(name: &str, config: KConfig) -> Result<Self> {
        info!("Connecting context '{}' to {}", name, config.cluster_url);
        let client = Client::try_from(config)
            .map_err(|e| HarnessError::Kubeconfig(format!("Failed to create client: {}", e)))?;
        Ok(Self::new(name, client))
    }
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
