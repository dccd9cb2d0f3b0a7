//! Assertions over node execution records.

use crate::core::Status;
use crate::execution::{NodeExecution, StatusTransition};

/// The current attempt of the node with `identifier`.
///
/// Superseded retry attempts are skipped; among several matches (strategy
/// iterations, re-runs) the last one created wins.
#[must_use]
pub fn latest_attempt<'a>(nodes: &'a [NodeExecution], identifier: &str) -> Option<&'a NodeExecution> {
    nodes
        .iter()
        .filter(|n| n.identifier == identifier && !n.old_retry)
        .max_by_key(|n| n.sequence)
}

/// Asserts the status of the current attempt of a node.
pub fn assert_node_status(nodes: &[NodeExecution], identifier: &str, expected: Status) {
    let node = latest_attempt(nodes, identifier).unwrap_or_else(|| {
        panic!(
            "No node execution '{}'. Known: {:?}",
            identifier,
            nodes.iter().map(|n| n.identifier.as_str()).collect::<Vec<_>>()
        )
    });
    assert_eq!(
        node.status, expected,
        "Expected '{}' to be {}, got {}",
        identifier, expected, node.status
    );
}

/// Asserts that every node execution reached a terminal status.
pub fn assert_all_terminal(nodes: &[NodeExecution]) {
    let open: Vec<(&str, Status)> = nodes
        .iter()
        .filter(|n| !n.is_terminal())
        .map(|n| (n.identifier.as_str(), n.status))
        .collect();
    assert!(open.is_empty(), "Expected all nodes terminal, open: {open:?}");
}

/// Asserts the sequence of statuses a node moved through.
pub fn assert_status_path(history: &[StatusTransition], expected: &[Status]) {
    let actual: Vec<Status> = history.iter().map(|t| t.to).collect();
    assert_eq!(actual, expected, "Unexpected status path");
}
