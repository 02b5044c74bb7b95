//! Propagation through a long chain of nodes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tangle_core::model::{ComponentDocument, ConnectionRecord, GraphDocument, GraphModel, NodeDocument, PortType};
use tangle_core::registry::{InputDef, NodeDefinition, NodeRegistry, OutputDef};
use tangle_core::{ExecutionContext, NodeKey, Value};

fn increment() -> NodeDefinition {
    NodeDefinition::new("Increment")
        .input(
            "value",
            InputDef::new(PortType::Number).set(|io, v| {
                let n = v.as_number().unwrap_or(0.0);
                io.internals_mut().set("result", Value::number(n + 1.0));
                io.flag_output_dirty("result");
                Ok(())
            }),
        )
        .output("result", OutputDef::new(PortType::Number).get(|i| i.value("result")))
}

fn chain(length: usize) -> (ExecutionContext, NodeKey, NodeKey) {
    let mut app = ComponentDocument::new("App");
    for i in 0..length {
        app = app.with_node(NodeDocument::new(format!("n{i}"), "Increment"));
        if i > 0 {
            app = app.with_connection(ConnectionRecord::new(format!("n{}", i - 1), "result", format!("n{i}"), "value"));
        }
    }
    let graph = GraphModel::import(GraphDocument {
        components: vec![app],
        ..GraphDocument::default()
    })
    .unwrap();
    let mut registry = NodeRegistry::new();
    registry.register(increment());

    let mut ctx = ExecutionContext::with_registry(graph, registry);
    let scope = ctx.create_root_scope("App").unwrap();
    ctx.update();
    let head = ctx.find_node(scope, "n0").unwrap();
    let tail = ctx.find_node(scope, &format!("n{}", length - 1)).unwrap();
    (ctx, head, tail)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for length in [10, 100, 1000] {
        let (mut ctx, head, tail) = chain(length);
        let mut input = 0.0;
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, _| {
            b.iter(|| {
                input += 1.0;
                ctx.set_input(head, "value", Value::number(input)).unwrap();
                ctx.update();
                black_box(ctx.output_value(tail, "result"))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain);
criterion_main!(benches);
