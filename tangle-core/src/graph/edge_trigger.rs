//! Edge-Triggered Inputs
//!
//! Signal inputs receive a `true` followed by a `false` for every pulse.
//! [`edge_triggered`] wraps an action so it only runs on the rising edge.

use std::sync::Arc;

use super::io::NodeIo;
use crate::registry::SetFn;
use crate::value::Value;

/// Build a setter that runs `action` on each false-to-true transition.
///
/// The last seen level is kept on the input port itself.
pub fn edge_triggered<F>(action: F) -> SetFn
where
    F: Fn(&mut NodeIo<'_>) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(move |io: &mut NodeIo<'_>, value: Value| {
        let level = value.as_bool();
        let previous = io.swap_level(level);
        if level && !previous {
            action(io)
        } else {
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeId, NodeKey, NodeKind, ScopeId};
    use crate::model::PortType;
    use crate::registry::InputDef;

    fn node() -> Node {
        let key = NodeKey::new(ScopeId::from(1), NodeId::from(1));
        let mut node = Node::new(key, "n", "Counter", NodeKind::ComponentChildren);
        node.register_input("do", InputDef::new(PortType::Signal));
        node
    }

    fn run(setter: &SetFn, node: &mut Node, value: Value) {
        let mut io = NodeIo::new(node, Some("do"), 0);
        setter(&mut io, value).unwrap();
    }

    #[test]
    fn fires_only_on_rising_edge() {
        let mut node = node();
        let setter = edge_triggered(|io| {
            let count = io.internals().number("count");
            io.internals_mut().set("count", Value::number(count + 1.0));
            Ok(())
        });

        run(&setter, &mut node, Value::Signal(true));
        run(&setter, &mut node, Value::Signal(true));
        assert_eq!(node.internals().number("count"), 1.0);

        run(&setter, &mut node, Value::Signal(false));
        run(&setter, &mut node, Value::Signal(true));
        assert_eq!(node.internals().number("count"), 2.0);
    }

    #[test]
    fn falling_edge_alone_does_nothing() {
        let mut node = node();
        let setter = edge_triggered(|_| Err("should not run".into()));
        run(&setter, &mut node, Value::Signal(false));
        run(&setter, &mut node, Value::null());
    }

    #[test]
    fn level_stays_out_of_internals() {
        let mut node = node();
        let setter = edge_triggered(|_| Ok(()));
        run(&setter, &mut node, Value::Signal(true));
        assert!(node.input("do").unwrap().level);
        assert!(node.internals().get("__level:do").is_none());
        assert_eq!(node.serialize()["internals"], serde_json::json!({}));
    }
}
