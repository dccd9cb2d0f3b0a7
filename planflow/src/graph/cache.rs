//! Version-ordered graph cache.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::model::OrchestrationGraph;

/// Caches one graph per execution.
///
/// Every projection and every invalidation draws a number from one counter.
/// A graph is served only while its number is above the execution's last
/// invalidation, so a projection that raced with a new record is never
/// cached.
#[derive(Debug, Default)]
pub struct GraphCache {
    order: AtomicU64,
    entries: DashMap<Uuid, Arc<OrchestrationGraph>>,
    invalidated_at: DashMap<Uuid, u64>,
}

impl GraphCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws the next order number.
    pub fn next_order(&self) -> u64 {
        self.order.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The cached graph of an execution, if still valid.
    #[must_use]
    pub fn get(&self, plan_execution_id: Uuid) -> Option<Arc<OrchestrationGraph>> {
        let graph = self.entries.get(&plan_execution_id)?.clone();
        (graph.cache_order > self.invalidated(plan_execution_id)).then_some(graph)
    }

    /// Stores a graph unless it is stale or older than the cached one.
    pub fn put(&self, graph: OrchestrationGraph) -> Arc<OrchestrationGraph> {
        let graph = Arc::new(graph);
        if graph.cache_order <= self.invalidated(graph.plan_execution_id) {
            return graph;
        }
        self.entries
            .entry(graph.plan_execution_id)
            .and_modify(|current| {
                if current.cache_order < graph.cache_order {
                    *current = graph.clone();
                }
            })
            .or_insert_with(|| graph.clone());
        graph
    }

    /// Marks every graph of the execution projected so far as stale.
    pub fn invalidate(&self, plan_execution_id: Uuid) {
        let order = self.next_order();
        self.invalidated_at.insert(plan_execution_id, order);
        self.entries.remove(&plan_execution_id);
    }

    /// Number of cached graphs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn invalidated(&self, plan_execution_id: Uuid) -> u64 {
        self.invalidated_at
            .get(&plan_execution_id)
            .map_or(0, |order| *order)
    }
}
