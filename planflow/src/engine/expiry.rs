//! Expiry of nodes that waited too long on their callbacks.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::OrchestrationEngine;
use crate::cancellation::CancellationToken;
use crate::errors::EngineError;
use crate::interrupts::{InterruptConfig, InterruptOutcome, InterruptRequest, InterruptType};
use crate::utils::Timestamp;

impl OrchestrationEngine {
    /// Issues an expire interrupt for every node whose callback deadline is
    /// at or before `now`. Returns how many nodes were expired; a node that
    /// cannot be expired is logged and skipped.
    pub async fn expire_overdue(&self, now: Timestamp) -> Result<usize, EngineError> {
        let overdue = self.inner.store.overdue_callbacks(now).await?;
        let mut expired = 0;
        for node_execution_id in overdue {
            match self.expire_node_execution(node_execution_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%node_execution_id, error = %e, "Failed to expire overdue node");
                }
            }
        }
        for task_id in self.inner.dispatcher.expired_tasks(now) {
            warn!(%task_id, "Remote task passed its deadline");
        }
        if expired > 0 {
            info!(expired, "Expired overdue nodes");
        }
        Ok(expired)
    }

    async fn expire_node_execution(&self, node_execution_id: Uuid) -> Result<bool, EngineError> {
        let node = self.inner.store.get_node_execution(node_execution_id).await?;
        let request = InterruptRequest::new(
            InterruptType::Expire,
            node.plan_execution_id,
            InterruptConfig::issued_by("expiry-monitor").with_reason("callback deadline passed"),
        )
        .for_node(node_execution_id);
        let outcome = self.interrupt(request).await?;
        Ok(matches!(outcome, InterruptOutcome::Registered { .. }))
    }

    /// Runs [`Self::expire_overdue`] on the configured interval until
    /// `shutdown` is cancelled.
    pub fn spawn_expiry_monitor(&self, shutdown: Arc<CancellationToken>) -> JoinHandle<()> {
        let engine = self.clone();
        let interval = self.inner.config.expiry_check_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Expiry monitor stopped");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = engine.expire_overdue(crate::utils::now_utc()).await {
                            warn!(error = %e, "Expiry check failed");
                        }
                    }
                }
            }
        })
    }
}
