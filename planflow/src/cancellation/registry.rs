//! Per-execution cancellation tokens.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::CancellationToken;

/// Hands out one token per plan execution so an abort can reach synchronous
/// work that is still running inline.
#[derive(Debug, Default)]
pub struct ExecutionTokens {
    tokens: DashMap<Uuid, Arc<CancellationToken>>,
}

impl ExecutionTokens {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token for an execution, creating it on first use.
    pub fn token(&self, plan_execution_id: Uuid) -> Arc<CancellationToken> {
        self.tokens
            .entry(plan_execution_id)
            .or_insert_with(|| Arc::new(CancellationToken::new()))
            .clone()
    }

    /// Cancels the execution's token on behalf of an interrupt.
    pub fn cancel(&self, plan_execution_id: Uuid, interrupt_id: Uuid, reason: &str) {
        self.token(plan_execution_id)
            .cancel_for_interrupt(interrupt_id, reason);
    }

    /// Drops the token of a concluded execution.
    pub fn release(&self, plan_execution_id: Uuid) {
        self.tokens.remove(&plan_execution_id);
    }

    /// Number of tracked executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true when no execution is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
