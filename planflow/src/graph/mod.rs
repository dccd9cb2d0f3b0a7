//! Graph projection.
//!
//! Node execution records form an append-only log. The projector turns that
//! log into a DAG for display: a parent lists the heads of its nested chains
//! in `edges`, and chain members link to each other through `next_ids` and
//! `prev_ids`. Graphs are cached per execution and invalidated by the
//! engine's node and plan events.

mod builder;
mod cache;
mod model;
mod projector;

pub use cache::GraphCache;
pub use model::{EdgeList, GraphVertex, OrchestrationGraph};
pub use projector::GraphProjector;
