//! Graph vertices and adjacency.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

use crate::core::{ExecutionMode, SkipType, Status};
use crate::execution::NodeExecution;
use crate::utils::Timestamp;

/// One displayable node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphVertex {
    /// Node execution id.
    pub uuid: Uuid,
    /// Plan node id.
    pub plan_node_id: String,
    /// Identifier, suffixed per strategy iteration.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Step type name.
    pub step_type: String,
    /// Facilitation mode.
    pub mode: ExecutionMode,
    /// Current status.
    pub status: Status,
    /// How a skipped vertex renders.
    pub skip_type: SkipType,
    /// The failure was ignored by an adviser.
    pub failure_ignored: bool,
    /// Ids of the earlier attempts of this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_ids: Vec<Uuid>,
    /// Step outcome, once concluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    /// Failure message, once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// When the node started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the node concluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl From<&NodeExecution> for GraphVertex {
    fn from(node: &NodeExecution) -> Self {
        Self {
            uuid: node.uuid,
            plan_node_id: node.plan_node_id.clone(),
            identifier: node.identifier.clone(),
            name: node.name.clone(),
            step_type: node.step_type.type_name.clone(),
            mode: node.mode,
            status: node.status,
            skip_type: node.skip_type,
            failure_ignored: node.failure_ignored,
            retry_ids: node.retry_ids.clone(),
            outcome: node.outcome.clone(),
            failure_message: node.failure_message.clone(),
            started_at: node.started_at,
            ended_at: node.ended_at,
        }
    }
}

/// Adjacency of one vertex.
///
/// `edges` holds the chain heads nested under the vertex. Successors in the
/// same chain are linked through `next_ids` and `prev_ids`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeList {
    /// The enclosing node execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Chain predecessors.
    #[serde(default)]
    pub prev_ids: Vec<Uuid>,
    /// Chain successors.
    #[serde(default)]
    pub next_ids: Vec<Uuid>,
    /// Nested chain heads.
    #[serde(default)]
    pub edges: Vec<Uuid>,
}

/// A displayable DAG projected from an execution's node records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationGraph {
    /// The execution.
    pub plan_execution_id: Uuid,
    /// Top-level vertices.
    pub root_node_ids: Vec<Uuid>,
    /// Execution status at projection time.
    pub status: Status,
    /// Projection order; a later graph of the same execution has a higher one.
    pub cache_order: u64,
    /// Vertices in creation order.
    pub vertices: Vec<GraphVertex>,
    /// Adjacency keyed by vertex id.
    pub adjacency: BTreeMap<Uuid, EdgeList>,
}

impl OrchestrationGraph {
    /// Looks up a vertex.
    #[must_use]
    pub fn vertex(&self, uuid: Uuid) -> Option<&GraphVertex> {
        self.vertices.iter().find(|v| v.uuid == uuid)
    }

    /// The first vertex with `identifier`.
    #[must_use]
    pub fn find(&self, identifier: &str) -> Option<&GraphVertex> {
        self.vertices.iter().find(|v| v.identifier == identifier)
    }

    /// Adjacency of a vertex.
    #[must_use]
    pub fn edges(&self, uuid: Uuid) -> Option<&EdgeList> {
        self.adjacency.get(&uuid)
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// True when the graph has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// `root` and every vertex nested below it, following nested chain heads
    /// and their successors.
    #[must_use]
    pub fn subtree(&self, root: Uuid) -> BTreeSet<Uuid> {
        let mut seen = BTreeSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let Some(list) = self.adjacency.get(&id) else {
                continue;
            };
            let successors = if id == root { &[][..] } else { &list.next_ids[..] };
            for next in list.edges.iter().chain(successors) {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        seen
    }
}
