//! The graph projector.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::builder::{build_graph, build_partial_graph};
use super::cache::GraphCache;
use super::model::OrchestrationGraph;
use crate::errors::{EngineError, StoreError};
use crate::events::EventSink;
use crate::execution::{ExecutionStore, PlanExecution};

const INVALIDATING_PREFIXES: [&str; 2] = ["node_execution.", "plan_execution."];

/// Projects execution records into graphs and caches the results.
///
/// The projector is an event sink: node and plan execution events invalidate
/// the cached graph of their execution.
pub struct GraphProjector {
    store: Arc<dyn ExecutionStore>,
    cache: GraphCache,
    cache_enabled: bool,
}

impl GraphProjector {
    /// Creates a caching projector over a store.
    #[must_use]
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            cache: GraphCache::new(),
            cache_enabled: true,
        }
    }

    /// Turns caching on or off.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// The full graph of an execution.
    pub async fn generate_graph(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Arc<OrchestrationGraph>, EngineError> {
        if self.cache_enabled {
            if let Some(graph) = self.cache.get(plan_execution_id) {
                debug!(%plan_execution_id, cache_order = graph.cache_order, "Graph cache hit");
                return Ok(graph);
            }
        }

        let order = self.cache.next_order();
        let execution = self.execution(plan_execution_id).await?;
        let nodes = self.store.fetch_node_executions(plan_execution_id).await?;
        let start = if nodes.is_empty() {
            self.store
                .get_plan(&execution.plan_id)
                .await
                .ok()
                .and_then(|plan| plan.start_node().cloned())
        } else {
            None
        };
        let graph = build_graph(&execution, &nodes, start.as_ref(), order);
        debug!(
            %plan_execution_id,
            vertices = graph.len(),
            cache_order = order,
            "Projected graph"
        );

        Ok(if self.cache_enabled {
            self.cache.put(graph)
        } else {
            Arc::new(graph)
        })
    }

    /// The graph of the subtree rooted at one node execution.
    pub async fn generate_partial_graph(
        &self,
        plan_execution_id: Uuid,
        node_execution_id: Uuid,
    ) -> Result<OrchestrationGraph, EngineError> {
        let order = self.cache.next_order();
        let execution = self.execution(plan_execution_id).await?;
        let nodes = self.store.fetch_node_executions(plan_execution_id).await?;
        build_partial_graph(&execution, &nodes, node_execution_id, order)
            .ok_or(EngineError::NodeNotFound(node_execution_id))
    }

    /// Drops the cached graph of an execution.
    pub fn invalidate(&self, plan_execution_id: Uuid) {
        self.cache.invalidate(plan_execution_id);
    }

    /// Number of cached graphs.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    async fn execution(&self, plan_execution_id: Uuid) -> Result<PlanExecution, EngineError> {
        match self.store.get_plan_execution(plan_execution_id).await {
            Ok(execution) => Ok(execution),
            Err(StoreError::NotFound { .. }) => {
                Err(EngineError::ExecutionNotFound(plan_execution_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn observe(&self, event_type: &str, data: Option<&Value>) {
        if !INVALIDATING_PREFIXES.iter().any(|p| event_type.starts_with(p)) {
            return;
        }
        let id = data
            .and_then(|d| d.get("plan_execution_id"))
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        if let Some(id) = id {
            self.invalidate(id);
        }
    }
}

impl std::fmt::Debug for GraphProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphProjector")
            .field("cache_enabled", &self.cache_enabled)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for GraphProjector {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.observe(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.observe(event_type, data.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::{Ambiance, ExecutionMetadata, Level};
    use crate::core::{ExecutionMode, OrchestrationEvent, StepCategory, StepType};
    use crate::events::emit_event;
    use crate::execution::{InMemoryExecutionStore, NodeExecution};
    use crate::plan::{Plan, PlanNode};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn seeded() -> (Arc<InMemoryExecutionStore>, GraphProjector, Uuid, PlanNode) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let node = PlanNode::new(
            "root",
            "pipeline",
            StepType::new("Echo", StepCategory::Step),
            ExecutionMode::Sync,
        );
        store
            .put_plan(Arc::new(Plan::new("plan", "root", [node.clone()])))
            .await
            .unwrap();
        let exec = Uuid::new_v4();
        store
            .create_plan_execution(PlanExecution::new(
                exec,
                "plan",
                json!({}),
                ExecutionMetadata::manual("t"),
            ))
            .await
            .unwrap();
        let projector = GraphProjector::new(store.clone());
        (store, projector, exec, node)
    }

    #[tokio::test]
    async fn test_unknown_execution() {
        let (_, projector, _, _) = seeded().await;
        let err = projector.generate_graph(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_event_invalidates_cached_graph() {
        let (store, projector, exec, node) = seeded().await;
        let first = projector.generate_graph(exec).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(projector.cached_count(), 1);
        let again = projector.generate_graph(exec).await.unwrap();
        assert_eq!(again.cache_order, first.cache_order);

        let uuid = Uuid::new_v4();
        let ambiance = Ambiance::new(exec, "plan", BTreeMap::new(), ExecutionMetadata::manual("t"))
            .clone_for_child(Level::new(uuid, "root", "pipeline", node.step_type.clone()));
        store
            .append_node_execution(NodeExecution::queued(uuid, &node, ambiance))
            .await
            .unwrap();
        emit_event(&projector, &OrchestrationEvent::node_created(exec, uuid, "pipeline"));
        assert_eq!(projector.cached_count(), 0);

        let fresh = projector.generate_graph(exec).await.unwrap();
        assert!(fresh.cache_order > first.cache_order);
        assert_eq!(fresh.root_node_ids, vec![uuid]);
    }

    #[tokio::test]
    async fn test_unrelated_events_keep_cache() {
        let (_, projector, exec, _) = seeded().await;
        projector.generate_graph(exec).await.unwrap();
        projector.try_emit("task.submitted", Some(json!({"plan_execution_id": exec})));
        assert_eq!(projector.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_graph_of_unknown_node() {
        let (_, projector, exec, _) = seeded().await;
        let err = projector
            .generate_partial_graph(exec, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeNotFound(_)));
    }
}
