//! In-memory execution store.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::records::{
    CallbackResolution, ChildProgress, NodeExecution, NodePatch, PendingChild, PlanExecution,
    StatusTransition,
};
use super::store::{ExecutionStore, InterruptRegistration};
use crate::core::Status;
use crate::errors::StoreError;
use crate::interrupts::{Interrupt, InterruptState};
use crate::plan::Plan;
use crate::utils::{now_utc, Timestamp};

#[derive(Debug, Clone)]
struct CallbackWait {
    callback_ids: Vec<String>,
    responses: BTreeMap<String, Value>,
    expires_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
struct ChildrenState {
    remaining: usize,
    deferred: VecDeque<PendingChild>,
}

/// Execution store backed by concurrent maps.
///
/// Each map guard is dropped before the method returns; no guard is held
/// across an await point.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    sequence: AtomicU64,
    plans: DashMap<String, Arc<Plan>>,
    executions: DashMap<Uuid, PlanExecution>,
    nodes: DashMap<Uuid, NodeExecution>,
    nodes_by_execution: DashMap<Uuid, Vec<Uuid>>,
    children_index: DashMap<Uuid, Vec<Uuid>>,
    history: DashMap<Uuid, Vec<StatusTransition>>,
    waits: DashMap<String, Uuid>,
    pending: DashMap<Uuid, CallbackWait>,
    callback_history: DashMap<Uuid, Vec<String>>,
    outputs: DashMap<(Uuid, String), Value>,
    children: DashMap<Uuid, ChildrenState>,
    paused: DashMap<Uuid, Vec<Uuid>>,
    interrupts: DashMap<Uuid, Vec<Interrupt>>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node execution records.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of outstanding async waits.
    #[must_use]
    pub fn pending_wait_count(&self) -> usize {
        self.pending.len()
    }

    fn node_ids_sorted(&self, ids: &[Uuid]) -> Vec<NodeExecution> {
        let mut nodes: Vec<NodeExecution> = ids
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| n.clone()))
            .collect();
        nodes.sort_by_key(|n| n.sequence);
        nodes
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn put_plan(&self, plan: Arc<Plan>) -> Result<(), StoreError> {
        self.plans.insert(plan.plan_id.clone(), plan);
        Ok(())
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Arc<Plan>, StoreError> {
        self.plans
            .get(plan_id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::not_found("plan", plan_id))
    }

    async fn create_plan_execution(&self, execution: PlanExecution) -> Result<(), StoreError> {
        match self.executions.entry(execution.uuid) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: "plan execution",
                id: execution.uuid.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(execution);
                Ok(())
            }
        }
    }

    async fn get_plan_execution(&self, id: Uuid) -> Result<PlanExecution, StoreError> {
        self.executions
            .get(&id)
            .map(|e| e.clone())
            .ok_or_else(|| StoreError::not_found("plan execution", id))
    }

    async fn update_plan_status(
        &self,
        id: Uuid,
        status: Status,
    ) -> Result<PlanExecution, StoreError> {
        let mut execution = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("plan execution", id))?;
        if !execution.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: execution.status,
                to: status,
            });
        }
        execution.status = status;
        if status.is_terminal() {
            execution.ended_at = Some(now_utc());
        }
        Ok(execution.clone())
    }

    async fn append_node_execution(
        &self,
        mut node: NodeExecution,
    ) -> Result<NodeExecution, StoreError> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(StoreError::AlreadyExists {
                kind: "node execution",
                id: node.uuid.to_string(),
            });
        }
        node.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.nodes_by_execution
            .entry(node.plan_execution_id)
            .or_default()
            .push(node.uuid);
        if let Some(parent) = node.parent_id {
            self.children_index.entry(parent).or_default().push(node.uuid);
        }
        self.nodes.insert(node.uuid, node.clone());
        Ok(node)
    }

    async fn get_node_execution(&self, id: Uuid) -> Result<NodeExecution, StoreError> {
        self.nodes
            .get(&id)
            .map(|n| n.clone())
            .ok_or_else(|| StoreError::not_found("node execution", id))
    }

    async fn transition_node_status(
        &self,
        id: Uuid,
        status: Status,
    ) -> Result<NodeExecution, StoreError> {
        let updated = {
            let mut node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("node execution", id))?;
            let from = node.status;
            if !from.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: status,
                });
            }
            let now = now_utc();
            node.status = status;
            if status == Status::Running && node.started_at.is_none() {
                node.started_at = Some(now);
            }
            if status.is_terminal() {
                node.ended_at = Some(now);
            }
            (node.clone(), from, now)
        };
        let (node, from, at) = updated;
        self.history.entry(id).or_default().push(StatusTransition {
            node_execution_id: id,
            from,
            to: status,
            at,
        });
        if status.is_terminal() {
            self.children.remove(&id);
        }
        Ok(node)
    }

    async fn patch_node(&self, id: Uuid, patch: NodePatch) -> Result<NodeExecution, StoreError> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node execution", id))?;
        patch.apply(&mut node);
        Ok(node.clone())
    }

    async fn mark_advised(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("node execution", id))?;
        if node.advised {
            return Ok(false);
        }
        node.advised = true;
        Ok(true)
    }

    async fn fetch_node_executions(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<NodeExecution>, StoreError> {
        let ids = self
            .nodes_by_execution
            .get(&plan_execution_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(self.node_ids_sorted(&ids))
    }

    async fn fetch_children(&self, parent_id: Uuid) -> Result<Vec<NodeExecution>, StoreError> {
        let ids = self
            .children_index
            .get(&parent_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(self.node_ids_sorted(&ids))
    }

    async fn status_history(&self, id: Uuid) -> Result<Vec<StatusTransition>, StoreError> {
        Ok(self.history.get(&id).map(|h| h.clone()).unwrap_or_default())
    }

    async fn register_callbacks(
        &self,
        node_execution_id: Uuid,
        callback_ids: Vec<String>,
        expires_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        if let Some((_, previous)) = self.pending.remove(&node_execution_id) {
            for id in previous.callback_ids {
                self.waits.remove(&id);
            }
        }
        for id in &callback_ids {
            self.waits.insert(id.clone(), node_execution_id);
        }
        self.callback_history
            .entry(node_execution_id)
            .or_default()
            .extend(callback_ids.iter().cloned());
        self.pending.insert(
            node_execution_id,
            CallbackWait {
                callback_ids,
                responses: BTreeMap::new(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn resolve_callback(
        &self,
        callback_id: &str,
        response: Value,
    ) -> Result<Option<CallbackResolution>, StoreError> {
        let Some((_, node_execution_id)) = self.waits.remove(callback_id) else {
            return Ok(None);
        };
        let complete = {
            let Some(mut wait) = self.pending.get_mut(&node_execution_id) else {
                return Ok(None);
            };
            wait.responses.insert(callback_id.to_string(), response);
            wait.responses.len() >= wait.callback_ids.len()
        };
        if !complete {
            return Ok(None);
        }
        Ok(self
            .pending
            .remove(&node_execution_id)
            .map(|(_, wait)| CallbackResolution {
                node_execution_id,
                responses: wait.responses,
            }))
    }

    async fn callback_ids_for(&self, node_execution_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .callback_history
            .get(&node_execution_id)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }

    async fn clear_callbacks(&self, node_execution_id: Uuid) -> Result<(), StoreError> {
        if let Some((_, wait)) = self.pending.remove(&node_execution_id) {
            for id in wait.callback_ids {
                self.waits.remove(&id);
            }
        }
        Ok(())
    }

    async fn overdue_callbacks(&self, now: Timestamp) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .pending
            .iter()
            .filter(|entry| entry.expires_at.is_some_and(|at| at <= now))
            .map(|entry| *entry.key())
            .collect())
    }

    async fn put_output(
        &self,
        node_execution_id: Uuid,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.outputs
            .insert((node_execution_id, key.to_string()), value);
        Ok(())
    }

    async fn get_output(
        &self,
        node_execution_id: Uuid,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .outputs
            .get(&(node_execution_id, key.to_string()))
            .map(|v| v.clone()))
    }

    async fn init_children(
        &self,
        parent_id: Uuid,
        total: usize,
        deferred: Vec<PendingChild>,
    ) -> Result<(), StoreError> {
        self.children.insert(
            parent_id,
            ChildrenState {
                remaining: total,
                deferred: deferred.into(),
            },
        );
        Ok(())
    }

    async fn complete_child(&self, parent_id: Uuid) -> Result<ChildProgress, StoreError> {
        let progress = {
            let mut state = self
                .children
                .get_mut(&parent_id)
                .ok_or_else(|| StoreError::not_found("children of", parent_id))?;
            state.remaining = state.remaining.saturating_sub(1);
            ChildProgress {
                remaining: state.remaining,
                next: state.deferred.pop_front(),
            }
        };
        if progress.remaining == 0 {
            self.children.remove(&parent_id);
        }
        Ok(progress)
    }

    async fn drain_deferred_children(&self, parent_id: Uuid) -> Result<usize, StoreError> {
        let Some(mut state) = self.children.get_mut(&parent_id) else {
            return Ok(0);
        };
        let drained = state.deferred.len();
        state.deferred.clear();
        state.remaining = state.remaining.saturating_sub(drained);
        Ok(drained)
    }

    async fn hold_paused(
        &self,
        plan_execution_id: Uuid,
        node_execution_id: Uuid,
    ) -> Result<(), StoreError> {
        self.paused
            .entry(plan_execution_id)
            .or_default()
            .push(node_execution_id);
        Ok(())
    }

    async fn take_paused(&self, plan_execution_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .paused
            .remove(&plan_execution_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default())
    }

    async fn register_interrupt(
        &self,
        interrupt: Interrupt,
    ) -> Result<InterruptRegistration, StoreError> {
        let mut list = self
            .interrupts
            .entry(interrupt.plan_execution_id)
            .or_default();
        if interrupt.interrupt_type.is_sticky() {
            if let Some(existing) = list
                .iter()
                .find(|i| i.state.is_active() && i.same_target(&interrupt))
            {
                return Ok(InterruptRegistration::Existing(existing.clone()));
            }
        }
        list.push(interrupt.clone());
        Ok(InterruptRegistration::Registered(interrupt))
    }

    async fn update_interrupt_state(
        &self,
        plan_execution_id: Uuid,
        interrupt_id: Uuid,
        state: InterruptState,
    ) -> Result<(), StoreError> {
        let mut list = self
            .interrupts
            .get_mut(&plan_execution_id)
            .ok_or_else(|| StoreError::not_found("interrupts of", plan_execution_id))?;
        let interrupt = list
            .iter_mut()
            .find(|i| i.uuid == interrupt_id)
            .ok_or_else(|| StoreError::not_found("interrupt", interrupt_id))?;
        interrupt.state = state;
        Ok(())
    }

    async fn list_interrupts(&self, plan_execution_id: Uuid) -> Result<Vec<Interrupt>, StoreError> {
        Ok(self
            .interrupts
            .get(&plan_execution_id)
            .map(|l| l.clone())
            .unwrap_or_default())
    }

    async fn active_interrupts(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<Interrupt>, StoreError> {
        Ok(self
            .interrupts
            .get(&plan_execution_id)
            .map(|l| {
                l.iter()
                    .filter(|i| i.interrupt_type.is_sticky() && i.state.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
