//! Engine construction.

use dashmap::DashMap;
use std::sync::Arc;

use super::policy::{AllowAll, PolicyGate};
use super::{EngineInner, OrchestrationEngine};
use crate::cancellation::ExecutionTokens;
use crate::config::EngineConfig;
use crate::creation::{
    CreatorRegistry, PartialPlanCreator, PlanCache, PlanCreatorService, StepPlanCreator,
};
use crate::dispatch::{InMemoryWorkerTransport, TaskDispatcher, WorkerTransport};
use crate::events::{EventSink, FanoutEventSink};
use crate::execution::{ExecutionStore, InMemoryExecutionStore};
use crate::graph::GraphProjector;
use crate::steps::{StepExecutable, StepRegistry};

/// Builder for [`OrchestrationEngine`].
///
/// Every part is optional; missing parts default to the in-memory store and
/// transport, the built-in steps and a gate that allows everything.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ExecutionStore>>,
    transport: Option<Arc<dyn WorkerTransport>>,
    sink: Option<Arc<dyn EventSink>>,
    policy: Option<Arc<dyn PolicyGate>>,
    steps: Option<Arc<StepRegistry>>,
    step_types: Vec<(String, StepExecutable)>,
    creators: Vec<Arc<dyn PartialPlanCreator>>,
}

impl EngineBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the execution store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the worker transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn WorkerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Adds an event sink next to the graph projector.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the policy gate.
    #[must_use]
    pub fn with_policy_gate(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Replaces the step registry.
    #[must_use]
    pub fn with_step_registry(mut self, steps: Arc<StepRegistry>) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Registers a leaf step type.
    ///
    /// The step is added to the registry and the type becomes known to plan
    /// creation with the mode of `executable`.
    #[must_use]
    pub fn with_step_type(mut self, type_name: impl Into<String>, executable: StepExecutable) -> Self {
        self.step_types.push((type_name.into(), executable));
        self
    }

    /// Adds a plan creator. Later creators shadow earlier ones.
    #[must_use]
    pub fn with_plan_creator(mut self, creator: Arc<dyn PartialPlanCreator>) -> Self {
        self.creators.push(creator);
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> OrchestrationEngine {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryExecutionStore::new()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(InMemoryWorkerTransport::new()));

        let graph = Arc::new(
            GraphProjector::new(store.clone()).with_cache_enabled(config.graph_cache_enabled),
        );
        let mut fanout = FanoutEventSink::new().with_sink(graph.clone());
        if let Some(sink) = self.sink {
            fanout.push(sink);
        }
        let sink: Arc<dyn EventSink> = Arc::new(fanout);

        let dispatcher = TaskDispatcher::new(transport)
            .with_sink(sink.clone())
            .with_poll_interval(config.poll_interval())
            .with_abort_ack_timeout(config.abort_ack_timeout())
            .with_default_timeout_ms(config.default_task_timeout_secs.saturating_mul(1_000));

        let steps = self
            .steps
            .unwrap_or_else(|| Arc::new(StepRegistry::with_defaults()));
        let mut registry = CreatorRegistry::with_defaults();
        if !self.step_types.is_empty() {
            let mut step_creator = StepPlanCreator::new();
            for (type_name, executable) in self.step_types {
                step_creator = step_creator.with_step_type(type_name.clone(), executable.mode());
                steps.register(type_name, executable);
            }
            registry.register(Arc::new(step_creator));
        }
        for creator in self.creators {
            registry.register(creator);
        }
        let mut creator = PlanCreatorService::new().with_registry(registry);
        if config.plan_cache_enabled {
            creator = creator.with_cache(Arc::new(PlanCache::new()));
        }

        OrchestrationEngine {
            inner: Arc::new(EngineInner {
                config,
                store,
                dispatcher: Arc::new(dispatcher),
                sink,
                steps,
                creator,
                policy: self.policy.unwrap_or_else(|| Arc::new(AllowAll)),
                graph,
                tokens: ExecutionTokens::new(),
                pending_launches: DashMap::new(),
            }),
        }
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("has_transport", &self.transport.is_some())
            .field("step_types", &self.step_types.len())
            .field("creators", &self.creators.len())
            .finish_non_exhaustive()
    }
}
