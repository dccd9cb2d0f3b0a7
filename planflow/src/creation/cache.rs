//! Plan cache.

use dashmap::DashMap;
use std::sync::Arc;

use crate::plan::Plan;

/// Built plans keyed by the hash of the definition they came from.
///
/// Plans are immutable, so one `Arc<Plan>` is shared by every execution of
/// the same definition.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<String, Arc<Plan>>,
}

impl PlanCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached plan.
    #[must_use]
    pub fn get(&self, definition_hash: &str) -> Option<Arc<Plan>> {
        self.plans.get(definition_hash).map(|p| Arc::clone(p.value()))
    }

    /// Caches a plan, returning the plan that ends up cached.
    ///
    /// If another caller stored a plan for the same hash first, that plan
    /// wins and is returned.
    pub fn insert(&self, definition_hash: impl Into<String>, plan: Arc<Plan>) -> Arc<Plan> {
        Arc::clone(self.plans.entry(definition_hash.into()).or_insert(plan).value())
    }

    /// Drops every cached plan.
    pub fn clear(&self) {
        self.plans.clear();
    }

    /// Number of cached plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionMode, StepCategory, StepType};
    use crate::plan::PlanNode;

    fn plan(id: &str) -> Arc<Plan> {
        Arc::new(Plan::new(
            id,
            "a",
            [PlanNode::new("a", "a", StepType::new("Echo", StepCategory::Step), ExecutionMode::Sync)],
        ))
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = PlanCache::new();
        let first = cache.insert("h", plan("first"));
        let second = cache.insert("h", plan("second"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.get("h").unwrap().plan_id, "first");
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
