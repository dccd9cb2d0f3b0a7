//! Projection of node execution records into graph adjacency.

use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use super::model::{EdgeList, GraphVertex, OrchestrationGraph};
use crate::core::{SkipType, Status};
use crate::execution::{NodeExecution, PlanExecution};
use crate::plan::PlanNode;
use crate::utils::stable_uuid;

/// Projects every current record of an execution.
///
/// Superseded retry attempts are left out; the attempt that replaced them
/// lists their ids. An execution with no records yet renders as its start
/// node, queued.
pub(crate) fn build_graph(
    execution: &PlanExecution,
    nodes: &[NodeExecution],
    start: Option<&PlanNode>,
    cache_order: u64,
) -> OrchestrationGraph {
    let records: Vec<&NodeExecution> = nodes.iter().filter(|n| !n.old_retry).collect();
    if records.is_empty() {
        if let Some(start) = start {
            return placeholder(execution, start, cache_order);
        }
    }
    let roots = records
        .iter()
        .filter(|n| n.parent_id.is_none() && n.previous_id.is_none())
        .map(|n| n.uuid)
        .collect();
    project(execution, &records, roots, cache_order)
}

/// Projects the subtree rooted at `root`.
///
/// The subtree holds the root and every record whose ambiance strictly
/// extends the root's. The root keeps its parent but loses its chain links.
/// Returns `None` if `root` is not a record of the execution.
pub(crate) fn build_partial_graph(
    execution: &PlanExecution,
    nodes: &[NodeExecution],
    root: Uuid,
    cache_order: u64,
) -> Option<OrchestrationGraph> {
    let root_record = nodes.iter().find(|n| n.uuid == root)?;
    let records: Vec<&NodeExecution> = nodes
        .iter()
        .filter(|n| {
            n.uuid == root
                || (!n.old_retry && n.ambiance.is_strict_extension_of(&root_record.ambiance))
        })
        .collect();
    let mut graph = project(execution, &records, vec![root], cache_order);
    if let Some(list) = graph.adjacency.get_mut(&root) {
        list.prev_ids.clear();
        list.next_ids.clear();
    }
    Some(graph)
}

fn project(
    execution: &PlanExecution,
    records: &[&NodeExecution],
    root_node_ids: Vec<Uuid>,
    cache_order: u64,
) -> OrchestrationGraph {
    let ids: HashSet<Uuid> = records.iter().map(|n| n.uuid).collect();
    let mut adjacency: BTreeMap<Uuid, EdgeList> = records
        .iter()
        .map(|n| {
            (
                n.uuid,
                EdgeList {
                    parent_id: n.parent_id,
                    ..EdgeList::default()
                },
            )
        })
        .collect();

    for node in records {
        match node.previous_id {
            Some(prev) if ids.contains(&prev) => {
                if let Some(list) = adjacency.get_mut(&prev) {
                    list.next_ids.push(node.uuid);
                }
                if let Some(list) = adjacency.get_mut(&node.uuid) {
                    list.prev_ids.push(prev);
                }
            }
            Some(_) => {}
            None => {
                if let Some(list) = node
                    .parent_id
                    .filter(|p| ids.contains(p))
                    .and_then(|p| adjacency.get_mut(&p))
                {
                    list.edges.push(node.uuid);
                }
            }
        }
    }

    OrchestrationGraph {
        plan_execution_id: execution.uuid,
        root_node_ids,
        status: execution.status,
        cache_order,
        vertices: records.iter().map(|n| GraphVertex::from(*n)).collect(),
        adjacency,
    }
}

fn placeholder(execution: &PlanExecution, start: &PlanNode, cache_order: u64) -> OrchestrationGraph {
    let uuid = stable_uuid(&format!("{}/{}", execution.uuid, start.uuid));
    let vertex = GraphVertex {
        uuid,
        plan_node_id: start.uuid.clone(),
        identifier: start.identifier.clone(),
        name: start.name.clone(),
        step_type: start.step_type.type_name.clone(),
        mode: start.facilitator,
        status: Status::Queued,
        skip_type: SkipType::NoOp,
        failure_ignored: false,
        retry_ids: Vec::new(),
        outcome: None,
        failure_message: None,
        started_at: None,
        ended_at: None,
    };
    OrchestrationGraph {
        plan_execution_id: execution.uuid,
        root_node_ids: vec![uuid],
        status: execution.status,
        cache_order,
        vertices: vec![vertex],
        adjacency: BTreeMap::from([(uuid, EdgeList::default())]),
    }
}
