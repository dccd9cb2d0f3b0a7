//! Benchmarks for plan creation, execution and graph projection.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use planflow::prelude::*;
use planflow::testing::{pipeline, stage, step};

fn definition(steps: usize) -> Value {
    let steps = (0..steps)
        .map(|i| step(&format!("s{i}"), "Echo", json!({ "i": i })))
        .collect();
    pipeline("bench", vec![stage("only", steps)])
}

fn plan_creation_benchmark(c: &mut Criterion) {
    let service = PlanCreatorService::new();
    let def = definition(50);
    c.bench_function("create_plan_50_steps", |b| {
        b.iter(|| black_box(service.create_plan(&def)))
    });
}

fn graph_benchmark(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    let mut group = c.benchmark_group("generate_graph");
    for steps in [10, 50, 150] {
        let engine = EngineBuilder::new()
            .with_config(EngineConfig::new().with_graph_cache(false))
            .build();
        let def = definition(steps);
        let Ok(exec) = runtime.block_on(engine.start_execution(
            &def,
            json!({}),
            ExecutionMetadata::manual("bench"),
        )) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(steps), &exec, |b, exec| {
            b.iter(|| black_box(runtime.block_on(engine.generate_graph(*exec))));
        });
    }
    group.finish();
}

criterion_group!(benches, plan_creation_benchmark, graph_benchmark);
criterion_main!(benches);
