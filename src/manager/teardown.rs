// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::sync::PoisonError;

use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use super::tracking::LifecycleEntry;
use super::{ResourceManager, Target};
use crate::error::{HarnessError, Result, TeardownFailure};
use crate::resources::ResourceRef;
use crate::wait::WaitHandle;

impl ResourceManager {
    /// Undo every creation tracked in the caller's scope, newest first.
    ///
    /// A failing entry does not stop the sweep: every entry is attempted, every
    /// outstanding deletion wait of the scope is joined, and all failures are
    /// reported together as [`HarnessError::TeardownAggregateFailure`].
    #[instrument(skip(self), fields(scope = %self.test_context()))]
    pub async fn delete_resources(&self) -> Result<()> {
        let scope = self.test_context();
        let entries = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(&scope);
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope)
            .unwrap_or_default();

        if entries.is_empty() && pending.is_empty() {
            info!("No resources to delete");
            return Ok(());
        }
        info!(
            count = entries.len(),
            pending = pending.len(),
            "Deleting tracked resources"
        );

        let mut failures = Vec::new();
        let mut waits: Vec<(ResourceRef, WaitHandle)> = pending
            .into_iter()
            .map(|p| (p.reference, p.handle))
            .collect();

        for entry in entries.into_iter().rev() {
            let reference = entry.reference.clone();
            match self.teardown_entry(entry).await {
                Ok(Some(handle)) => waits.push((reference, handle)),
                Ok(None) => {}
                Err(e) => {
                    warn!(resource = %reference, "Teardown failed: {}", e);
                    failures.push(TeardownFailure {
                        resource: reference,
                        error: e,
                    });
                }
            }
        }

        let outcomes = join_all(
            waits
                .into_iter()
                .map(|(reference, handle)| async move { (reference, handle.await) }),
        )
        .await;
        for (reference, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(resource = %reference, "Deletion did not converge: {}", e);
                failures.push(TeardownFailure {
                    resource: reference,
                    error: e,
                });
            }
        }

        if failures.is_empty() {
            info!("All tracked resources deleted");
            Ok(())
        } else {
            error!(failed = failures.len(), "Some resources could not be cleaned up");
            Err(HarnessError::TeardownAggregateFailure(failures))
        }
    }

    /// Delete one entry in the cluster it was created in. Returns the deletion wait when
    /// it runs deferred.
    async fn teardown_entry(&self, entry: LifecycleEntry) -> Result<Option<WaitHandle>> {
        let target = Target {
            handler: self.registry.resolve(&entry.reference.kind)?,
            context: self.context(&entry.reference.context)?,
            reference: entry.reference,
        };
        self.delete_target(&target).await?;

        if self.config.async_deletion {
            Ok(Some(self.wait_deleted_async(target)))
        } else {
            self.wait_deleted(&target).await.map(|_| None)
        }
    }
}
