//! Integration Tests for the Execution Engine
//!
//! These tests drive a project the way a host would: import a graph, create
//! a scope, run frames and apply edits, observing only the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use tangle_core::bundle::{BundleFetcher, BundleFuture};
use tangle_core::graph::edge_triggered;
use tangle_core::model::{
    ComponentDocument, ConnectionRecord, GraphDelta, GraphDocument, GraphModel, NodeDocument, Port,
    PortType, VariantRecord, COMPONENT_INPUTS,
};
use tangle_core::registry::{InputDef, NodeDefinition, NodeRegistry, OutputDef};
use tangle_core::{BundleLoader, ExecutionContext, NodeKey, RuntimeEvent, ScopeId, Value};

/// `PlusOne`: `result = value + 1`, counting how often `value` is applied.
fn plus_one() -> NodeDefinition {
    NodeDefinition::new("PlusOne")
        .input(
            "value",
            InputDef::new(PortType::Number).set(|io, v| {
                let runs = io.internals().number("runs");
                io.internals_mut().set("runs", Value::number(runs + 1.0));
                let n = v.as_number().unwrap_or(0.0);
                io.internals_mut().set("result", Value::number(n + 1.0));
                io.flag_output_dirty("result");
                Ok(())
            }),
        )
        .output("result", OutputDef::new(PortType::Number).get(|i| i.value("result")))
}

/// `Sum`: `result = a + b`.
fn sum() -> NodeDefinition {
    let operand = |name: &'static str| {
        InputDef::new(PortType::Number).default_value(json!(0)).set(move |io, v| {
            io.internals_mut().set(name, v);
            io.flag_output_dirty("result");
            Ok(())
        })
    };
    NodeDefinition::new("Sum")
        .input("a", operand("a"))
        .input("b", operand("b"))
        .output(
            "result",
            OutputDef::new(PortType::Number).get(|i| Value::number(i.number("a") + i.number("b"))),
        )
}

/// `Sink`: stores whatever arrives on `value`.
fn sink() -> NodeDefinition {
    NodeDefinition::new("Sink")
        .input(
            "value",
            InputDef::new(PortType::Any).set(|io, v| {
                let runs = io.internals().number("runs");
                io.internals_mut().set("runs", Value::number(runs + 1.0));
                io.internals_mut().set("value", v);
                Ok(())
            }),
        )
}

fn trigger() -> NodeDefinition {
    NodeDefinition::new("Trigger")
        .input(
            "fire",
            InputDef::new(PortType::Boolean).setter(edge_triggered(|io| {
                io.send_signal("fired");
                Ok(())
            })),
        )
        .output("fired", OutputDef::new(PortType::Signal))
}

fn counter() -> NodeDefinition {
    NodeDefinition::new("Counter").input(
        "increment",
        InputDef::new(PortType::Signal).setter(edge_triggered(|io| {
            let count = io.internals().number("count");
            io.internals_mut().set("count", Value::number(count + 1.0));
            Ok(())
        })),
    )
}

/// `Label`: a visual node with styled text.
fn label() -> NodeDefinition {
    let store = |name: &'static str| {
        move |io: &mut tangle_core::NodeIo<'_>, v: Value| {
            io.internals_mut().set(name, v);
            Ok(())
        }
    };
    NodeDefinition::new("Label")
        .category("UI")
        .input("text", InputDef::new(PortType::String).default_value(json!("")).set(store("text")))
        .input(
            "color",
            InputDef::new(PortType::String).default_value(json!("black")).set(store("color")),
        )
}

fn group() -> NodeDefinition {
    NodeDefinition::new("Group").category("UI")
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    for def in [plus_one(), sum(), sink(), trigger(), counter(), label(), group()] {
        registry.register(def);
    }
    registry
}

fn start(doc: GraphDocument) -> (ExecutionContext, ScopeId) {
    let graph = GraphModel::import(doc).unwrap();
    let mut ctx = ExecutionContext::with_registry(graph, registry());
    let scope = ctx.create_root_scope("App").unwrap();
    ctx.update();
    (ctx, scope)
}

fn app(component: ComponentDocument) -> GraphDocument {
    GraphDocument {
        components: vec![component],
        ..GraphDocument::default()
    }
}

fn internal(ctx: &ExecutionContext, key: NodeKey, name: &str) -> Value {
    ctx.node(key).unwrap().internals().value(name)
}

#[test]
fn chain_evaluates_each_node_once() {
    let (mut ctx, scope) = start(app(
        ComponentDocument::new("App")
            .with_node(NodeDocument::new("b", "PlusOne"))
            .with_node(NodeDocument::new("c", "PlusOne"))
            .with_node(NodeDocument::new("out", "Sink"))
            .with_connection(ConnectionRecord::new("b", "result", "c", "value"))
            .with_connection(ConnectionRecord::new("c", "result", "out", "value")),
    ));
    let b = ctx.find_node(scope, "b").unwrap();
    let c = ctx.find_node(scope, "c").unwrap();
    let out = ctx.find_node(scope, "out").unwrap();
    let runs = |ctx: &ExecutionContext, key| internal(ctx, key, "runs").as_number().unwrap_or(0.0);
    let (b_before, c_before) = (runs(&ctx, b), runs(&ctx, c));

    ctx.set_input(b, "value", Value::number(3.0)).unwrap();
    ctx.update();

    assert_eq!(runs(&ctx, b) - b_before, 1.0);
    assert_eq!(runs(&ctx, c) - c_before, 1.0);
    assert_eq!(ctx.output_value(c, "result"), Some(Value::number(5.0)));
    assert_eq!(internal(&ctx, out, "value"), Value::number(5.0));
}

#[test]
fn diamond_sees_only_settled_values() {
    let (mut ctx, scope) = start(app(
        ComponentDocument::new("App")
            .with_node(NodeDocument::new("left", "PlusOne"))
            .with_node(NodeDocument::new("right", "PlusOne"))
            .with_node(NodeDocument::new("join", "Sum"))
            .with_node(NodeDocument::new("out", "Sink"))
            .with_connection(ConnectionRecord::new("left", "result", "join", "a"))
            .with_connection(ConnectionRecord::new("right", "result", "join", "b"))
            .with_connection(ConnectionRecord::new("join", "result", "out", "value")),
    ));
    let left = ctx.find_node(scope, "left").unwrap();
    let right = ctx.find_node(scope, "right").unwrap();
    let join = ctx.find_node(scope, "join").unwrap();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let log = sent.clone();
    ctx.hooks_mut().on_value_sent = Some(Box::new(move |source, port, value| {
        if source == join && port == "result" {
            log.lock().push(value.clone());
        }
    }));

    ctx.set_input(left, "value", Value::number(1.0)).unwrap();
    ctx.set_input(right, "value", Value::number(10.0)).unwrap();
    ctx.update();

    assert_eq!(*sent.lock(), vec![Value::number(13.0)]);
    let out = ctx.find_node(scope, "out").unwrap();
    assert_eq!(internal(&ctx, out, "value"), Value::number(13.0));
}

#[test]
fn two_node_cycle_is_deferred_without_failing() {
    let (mut ctx, scope) = start(app(
        ComponentDocument::new("App")
            .with_node(NodeDocument::new("a", "PlusOne"))
            .with_node(NodeDocument::new("b", "PlusOne"))
            .with_connection(ConnectionRecord::new("a", "result", "b", "value"))
            .with_connection(ConnectionRecord::new("b", "result", "a", "value")),
    ));
    let detected = Arc::new(AtomicUsize::new(0));
    let seen = detected.clone();
    ctx.subscribe(move |event| {
        if matches!(event, RuntimeEvent::CycleDetected { .. }) {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    let a = ctx.find_node(scope, "a").unwrap();
    ctx.set_input(a, "value", Value::number(0.0)).unwrap();
    ctx.update();
    let first = ctx.output_value(a, "result").and_then(|v| v.as_number()).unwrap();
    assert!(detected.load(Ordering::SeqCst) >= 1);
    assert!(ctx.scheduler().warnings().any(|w| w.starts_with("cycle:")));

    // Parked nodes pick up again in later frames.
    ctx.update();
    ctx.update();
    let next = ctx.output_value(a, "result").and_then(|v| v.as_number()).unwrap();
    assert!(next > first);
}

#[test]
fn removing_a_parent_removes_its_subtree_once() {
    let (mut ctx, scope) = start(app(
        ComponentDocument::new("App")
            .with_node(NodeDocument::new("src", "PlusOne"))
            .with_node(
                NodeDocument::new("panel", "Group")
                    .with_child(NodeDocument::new("first", "Sink"))
                    .with_child(NodeDocument::new("second", "Sink")),
            )
            .with_connection(ConnectionRecord::new("src", "result", "first", "value"))
            .with_connection(ConnectionRecord::new("src", "result", "second", "value")),
    ));
    let removed = Arc::new(Mutex::new(Vec::new()));
    let log = removed.clone();
    ctx.subscribe(move |event| {
        if let RuntimeEvent::NodeRemoved { ids, .. } = event {
            log.lock().push(ids.clone());
        }
    });
    let keys: Vec<NodeKey> = ["panel", "first", "second"]
        .iter()
        .map(|id| ctx.find_node(scope, id).unwrap())
        .collect();

    ctx.apply(GraphDelta::RemoveNode {
        component: "App".into(),
        node: "panel".into(),
    })
    .unwrap();

    assert_eq!(
        *removed.lock(),
        vec![vec!["first".to_string(), "second".to_string(), "panel".to_string()]]
    );
    for key in keys {
        assert!(ctx.node(key).is_none());
    }
    let src = ctx.find_node(scope, "src").unwrap();
    assert!(ctx.node(src).unwrap().output("result").unwrap().consumers().is_empty());
    assert!(ctx.graph().component("App").unwrap().connections().is_empty());
}

#[test]
fn instance_inputs_reach_every_placeholder() {
    let boxed = ComponentDocument::new("Box")
        .with_port(Port::input("x", PortType::Number))
        .with_node(NodeDocument::new("in", COMPONENT_INPUTS))
        .with_node(NodeDocument::new("first", "Sink"))
        .with_connection(ConnectionRecord::new("in", "x", "first", "value"));
    let main = ComponentDocument::new("App").with_node(NodeDocument::new("box", "Box").with_parameter("x", json!(5)));
    let (mut ctx, scope) = start(GraphDocument {
        components: vec![boxed, main],
        ..GraphDocument::default()
    });
    let instance = ctx.find_node(scope, "box").unwrap();
    let child = ctx.node(instance).unwrap().kind().instance().unwrap().child_scope().unwrap();
    let first = ctx.find_node(child, "first").unwrap();
    assert_eq!(internal(&ctx, first, "value"), Value::number(5.0));

    ctx.apply_batch(vec![
        GraphDelta::AddNode {
            component: "Box".into(),
            node: NodeDocument::new("late", COMPONENT_INPUTS),
            parent: None,
            index: None,
        },
        GraphDelta::AddNode {
            component: "Box".into(),
            node: NodeDocument::new("second", "Sink"),
            parent: None,
            index: None,
        },
        GraphDelta::AddConnection {
            component: "Box".into(),
            connection: ConnectionRecord::new("late", "x", "second", "value"),
        },
    ])
    .unwrap();

    let second = ctx.find_node(child, "second").unwrap();
    assert_eq!(internal(&ctx, second, "value"), Value::number(5.0));
}

#[test]
fn variant_edits_reach_every_bound_instance() {
    let (mut ctx, scope) = start(GraphDocument {
        components: vec![ComponentDocument::new("App")
            .with_node(NodeDocument::new("one", "Label").with_variant("Primary"))
            .with_node(
                NodeDocument::new("two", "Label")
                    .with_parameter("color", json!("green"))
                    .with_variant("Primary"),
            )
            .with_node(NodeDocument::new("plain", "Label").with_parameter("color", json!("green")))],
        variants: vec![VariantRecord::new("Label", "Primary").with_parameter("text", json!("Go"))],
        ..GraphDocument::default()
    });
    let bound: Vec<NodeKey> = ["one", "two"].iter().map(|id| ctx.find_node(scope, id).unwrap()).collect();
    let plain = ctx.find_node(scope, "plain").unwrap();

    ctx.apply(GraphDelta::SetVariantParameter {
        type_name: "Label".into(),
        name: "Primary".into(),
        parameter: "color".into(),
        value: Some(json!("navy")),
        state: None,
    })
    .unwrap();
    for key in &bound {
        assert_eq!(internal(&ctx, *key, "color"), Value::string("navy"));
        assert_eq!(internal(&ctx, *key, "text"), Value::string("Go"));
    }
    assert_eq!(internal(&ctx, plain, "color"), Value::string("green"));

    ctx.apply(GraphDelta::SetVariantParameter {
        type_name: "Label".into(),
        name: "Primary".into(),
        parameter: "color".into(),
        value: None,
        state: None,
    })
    .unwrap();
    // Back to the built-in default, even where the record has its own color.
    for key in &bound {
        assert_eq!(internal(&ctx, *key, "color"), Value::string("black"));
    }
    assert_eq!(internal(&ctx, plain, "color"), Value::string("green"));
}

#[test]
fn signal_reaches_a_connection_made_mid_flight() {
    let (mut ctx, scope) = start(app(
        ComponentDocument::new("App")
            .with_node(NodeDocument::new("t", "Trigger"))
            .with_node(NodeDocument::new("early", "Counter"))
            .with_node(NodeDocument::new("late", "Counter"))
            .with_connection(ConnectionRecord::new("t", "fired", "early", "increment")),
    ));
    let t = ctx.find_node(scope, "t").unwrap();
    let early = ctx.find_node(scope, "early").unwrap();
    let late = ctx.find_node(scope, "late").unwrap();

    // Wire the late counter from an after-update task, before the falling
    // edge queued by the pulse has been sent.
    ctx.set_input(t, "fire", Value::boolean(true)).unwrap();
    ctx.schedule_after_update(Box::new(move |ctx| {
        ctx.connect(t, "fired", late, "increment").unwrap();
    }));
    ctx.update();

    assert_eq!(internal(&ctx, early, "count"), Value::number(1.0));
    assert_eq!(internal(&ctx, late, "count"), Value::number(1.0));
    assert!(!ctx.node(t).unwrap().output("fired").unwrap().signal_in_flight());
}

/// Serves one bundle after `gate` opens, counting fetches.
struct GatedFetcher {
    gate: Arc<Notify>,
    fetches: Arc<AtomicUsize>,
}

impl BundleFetcher for GatedFetcher {
    fn fetch(&self, bundle: &str) -> BundleFuture {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.clone();
        let components = vec![ComponentDocument::new(format!("{bundle}Button"))];
        async move {
            gate.notified().await;
            Ok(components)
        }
        .boxed()
    }
}

#[tokio::test]
async fn concurrent_bundle_requests_share_one_fetch() {
    let gate = Arc::new(Notify::new());
    let fetches = Arc::new(AtomicUsize::new(0));
    let loader = BundleLoader::new(GatedFetcher {
        gate: gate.clone(),
        fetches: fetches.clone(),
    });

    let first = tokio::spawn({
        let loader = loader.clone();
        async move { loader.load("ui").await }
    });
    let second = tokio::spawn({
        let loader = loader.clone();
        async move { loader.load("ui").await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!first.is_finished());
    assert!(!second.is_finished());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    gate.notify_one();
    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert_eq!(first.unwrap(), vec![ComponentDocument::new("uiButton")]);
    assert_eq!(second.unwrap(), vec![ComponentDocument::new("uiButton")]);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}
