//! The partial plan creator seam.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::definition::DefinitionField;
use crate::errors::PlanCreationError;
use crate::plan::PlanNode;

/// Wildcard in a creator's supported type set.
pub const ANY_TYPE: &str = "__any__";

/// A definition field waiting to be turned into plan nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    /// The field to create.
    pub field: DefinitionField,
    /// Plan node id the created node must take.
    pub uuid: String,
    /// Plan node id of the enclosing node.
    pub parent_id: Option<String>,
    /// Chain successor, routed to by a next-step adviser.
    pub next_node_id: Option<String>,
    /// Values resolved by the parent for this child.
    pub metadata: BTreeMap<String, Value>,
}

impl Dependency {
    /// Creates a dependency whose node id derives from the field's path.
    #[must_use]
    pub fn new(field: DefinitionField) -> Self {
        let uuid = field.node.uuid();
        Self {
            field,
            uuid,
            parent_id: None,
            next_node_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the enclosing node.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the chain successor.
    #[must_use]
    pub fn with_next(mut self, next_node_id: Option<String>) -> Self {
        self.next_node_id = next_node_id;
        self
    }

    /// Overrides the node id.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Attaches a resolved value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Mutable state shared by the creators of one plan.
#[derive(Debug, Default)]
pub struct CreationContext {
    nodes: BTreeMap<String, PlanNode>,
    stages: BTreeMap<String, Option<Value>>,
    child_pipeline: bool,
}

impl CreationContext {
    /// Context for a top-level pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a pipeline started by a pipeline stage.
    #[must_use]
    pub fn for_child_pipeline() -> Self {
        Self {
            child_pipeline: true,
            ..Self::default()
        }
    }

    /// True while building a child pipeline.
    #[must_use]
    pub fn is_child_pipeline(&self) -> bool {
        self.child_pipeline
    }

    /// Adds a created node.
    pub fn add_node(&mut self, node: PlanNode) -> Result<(), PlanCreationError> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(PlanCreationError::invalid_field(
                node.identifier.clone(),
                format!("duplicate plan node {}", node.uuid),
            ));
        }
        self.nodes.insert(node.uuid.clone(), node);
        Ok(())
    }

    /// A created node.
    #[must_use]
    pub fn node(&self, uuid: &str) -> Option<&PlanNode> {
        self.nodes.get(uuid)
    }

    /// Records a finished stage with its resolved service.
    pub fn record_stage(&mut self, identifier: impl Into<String>, service: Option<Value>) {
        self.stages.insert(identifier.into(), service);
    }

    /// The service of an already created stage. `None` when the stage has
    /// not been created yet.
    #[must_use]
    pub fn stage_service(&self, identifier: &str) -> Option<Option<&Value>> {
        self.stages.get(identifier).map(Option::as_ref)
    }

    /// Number of created nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True before any node is created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Consumes the context.
    #[must_use]
    pub fn into_nodes(self) -> BTreeMap<String, PlanNode> {
        self.nodes
    }
}

/// Turns one kind of definition field into plan nodes.
///
/// Creation is two-phase. [`create_children`](Self::create_children)
/// enumerates child dependencies; once those are created,
/// [`create_parent`](Self::create_parent) builds the node that references
/// them. Leaf creators return no children.
pub trait PartialPlanCreator: Send + Sync {
    /// Creator name, for logs.
    fn name(&self) -> &str;

    /// Field name to the type tags this creator accepts ([`ANY_TYPE`] for all).
    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>>;

    /// Whether the creator handles `field`.
    fn supports(&self, field: &DefinitionField) -> bool {
        self.supported_types()
            .get(&field.name)
            .is_some_and(|types| {
                types.contains(ANY_TYPE) || field.node_type().is_some_and(|t| types.contains(t))
            })
    }

    /// Enumerates child dependencies.
    fn create_children(
        &self,
        _ctx: &mut CreationContext,
        _dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        Ok(Vec::new())
    }

    /// Builds the node for `dependency` once `children` exist.
    fn create_parent(
        &self,
        ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError>;
}

/// Builds a supported-type map from static pairs.
#[must_use]
pub fn type_set(entries: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
    entries
        .iter()
        .map(|(field, types)| {
            (
                (*field).to_string(),
                types.iter().map(|t| (*t).to_string()).collect(),
            )
        })
        .collect()
}
