//! The execution store trait.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::records::{
    CallbackResolution, ChildProgress, NodeExecution, NodePatch, PendingChild, PlanExecution,
    StatusTransition,
};
use crate::core::Status;
use crate::errors::StoreError;
use crate::interrupts::{Interrupt, InterruptState};
use crate::plan::Plan;
use crate::utils::Timestamp;

/// Result of registering an interrupt with the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptRegistration {
    /// The interrupt was recorded.
    Registered(Interrupt),
    /// An identical sticky interrupt is still active.
    Existing(Interrupt),
}

/// Durable state shared by every engine component.
///
/// Implementations must make each method atomic with respect to the record
/// it touches. Waits are keyed by callback id in the store rather than in
/// process memory, so a restarted engine can rehydrate them.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // Plans and plan executions.

    /// Stores a plan.
    async fn put_plan(&self, plan: Arc<Plan>) -> Result<(), StoreError>;

    /// Loads a plan.
    async fn get_plan(&self, plan_id: &str) -> Result<Arc<Plan>, StoreError>;

    /// Records a new plan execution.
    async fn create_plan_execution(&self, execution: PlanExecution) -> Result<(), StoreError>;

    /// Loads a plan execution.
    async fn get_plan_execution(&self, id: Uuid) -> Result<PlanExecution, StoreError>;

    /// Advances a plan execution's status. Terminal executions are never reopened.
    async fn update_plan_status(&self, id: Uuid, status: Status)
        -> Result<PlanExecution, StoreError>;

    // Node executions.

    /// Appends a node execution and assigns its sequence number.
    async fn append_node_execution(&self, node: NodeExecution)
        -> Result<NodeExecution, StoreError>;

    /// Loads a node execution.
    async fn get_node_execution(&self, id: Uuid) -> Result<NodeExecution, StoreError>;

    /// Moves a node to `status`, recording the transition.
    async fn transition_node_status(
        &self,
        id: Uuid,
        status: Status,
    ) -> Result<NodeExecution, StoreError>;

    /// Updates non-status fields.
    async fn patch_node(&self, id: Uuid, patch: NodePatch) -> Result<NodeExecution, StoreError>;

    /// Marks the node as advised. Returns false if it already was.
    async fn mark_advised(&self, id: Uuid) -> Result<bool, StoreError>;

    /// All node executions of an execution, in creation order.
    async fn fetch_node_executions(&self, plan_execution_id: Uuid)
        -> Result<Vec<NodeExecution>, StoreError>;

    /// Direct children of a node execution, in creation order.
    async fn fetch_children(&self, parent_id: Uuid) -> Result<Vec<NodeExecution>, StoreError>;

    /// Status history of a node execution, oldest first.
    async fn status_history(&self, id: Uuid) -> Result<Vec<StatusTransition>, StoreError>;

    // Async waits.

    /// Registers callback ids a node waits on, replacing any previous wait.
    async fn register_callbacks(
        &self,
        node_execution_id: Uuid,
        callback_ids: Vec<String>,
        expires_at: Option<Timestamp>,
    ) -> Result<(), StoreError>;

    /// Records a response. Each callback id resolves at most once; the
    /// resolution is returned when the node's last outstanding callback arrives.
    async fn resolve_callback(
        &self,
        callback_id: &str,
        response: Value,
    ) -> Result<Option<CallbackResolution>, StoreError>;

    /// Every callback id ever registered for a node, oldest first.
    async fn callback_ids_for(&self, node_execution_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Drops the node's outstanding wait, keeping the history.
    async fn clear_callbacks(&self, node_execution_id: Uuid) -> Result<(), StoreError>;

    /// Nodes whose wait expired at or before `now`.
    async fn overdue_callbacks(&self, now: Timestamp) -> Result<Vec<Uuid>, StoreError>;

    // Side-channel outputs.

    /// Stores a value produced by a node.
    async fn put_output(&self, node_execution_id: Uuid, key: &str, value: Value)
        -> Result<(), StoreError>;

    /// Loads a value produced by a node.
    async fn get_output(&self, node_execution_id: Uuid, key: &str)
        -> Result<Option<Value>, StoreError>;

    // Multi-child bookkeeping.

    /// Starts tracking `total` child chains of a parent, some of them deferred.
    /// Tracking ends once every chain completed or the parent concluded.
    async fn init_children(
        &self,
        parent_id: Uuid,
        total: usize,
        deferred: Vec<PendingChild>,
    ) -> Result<(), StoreError>;

    /// Records one finished child chain.
    async fn complete_child(&self, parent_id: Uuid) -> Result<ChildProgress, StoreError>;

    /// Drops deferred children that have not started yet. Returns how many.
    async fn drain_deferred_children(&self, parent_id: Uuid) -> Result<usize, StoreError>;

    // Pause handling.

    /// Holds a node that may not start while the execution is paused.
    async fn hold_paused(&self, plan_execution_id: Uuid, node_execution_id: Uuid)
        -> Result<(), StoreError>;

    /// Releases every held node of an execution.
    async fn take_paused(&self, plan_execution_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    // Interrupts.

    /// Records an interrupt unless an identical sticky one is active.
    async fn register_interrupt(&self, interrupt: Interrupt)
        -> Result<InterruptRegistration, StoreError>;

    /// Updates an interrupt's state.
    async fn update_interrupt_state(
        &self,
        plan_execution_id: Uuid,
        interrupt_id: Uuid,
        state: InterruptState,
    ) -> Result<(), StoreError>;

    /// Every interrupt of an execution, in registration order.
    async fn list_interrupts(&self, plan_execution_id: Uuid) -> Result<Vec<Interrupt>, StoreError>;

    /// Active sticky interrupts of an execution.
    async fn active_interrupts(&self, plan_execution_id: Uuid)
        -> Result<Vec<Interrupt>, StoreError>;
}
