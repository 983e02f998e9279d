//! Skills Registry: a hierarchical namespace into which core plugins inject
//! callables, with per-plugin log binding and top-level subtree
//! deregistration.

use std::collections::BTreeMap;
use std::sync::Arc;

use aigis_plugin_api::{PluginLog, SkillFn, SkillSpec, SkillValue};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::registry::PluginRegistry;

/// A node in the Skills tree. Leaves are callables or plain values;
/// internal nodes are namespaces.
enum Node {
    Namespace(BTreeMap<String, Node>),
    Leaf { owner: String, value: LeafValue },
}

#[derive(Clone)]
enum LeafValue {
    Callable(SkillFn),
    Value(Value),
}

impl Node {
    fn empty_namespace() -> Self {
        Node::Namespace(BTreeMap::new())
    }
}

/// What a resolved path terminates in, returned by [`Skills::resolve`] for
/// the broker to act on.
pub enum Resolved {
    Callable(SkillFn),
    Value(Value),
    NotFound,
}

/// Owns a reference to the plugin registry (so a reload request can be
/// forwarded) and the namespace tree.
pub struct Skills {
    tree: RwLock<BTreeMap<String, Node>>,
    registry: Arc<PluginRegistry>,
}

impl Skills {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Skills { tree: RwLock::new(BTreeMap::new()), registry }
    }

    /// Walks each dotted path from the plugin's declared `SkillSpec`s,
    /// creating intermediate namespace nodes, wrapping callables so calls
    /// receive the plugin's log sink.
    pub fn learn(&self, owner: &str, log: PluginLog, specs: Vec<SkillSpec>) -> Result<(), LoadError> {
        let mut tree = self.tree.write();
        for spec in specs {
            insert_path(&mut tree, &spec.path, owner, spec.value, &log)?;
        }
        Ok(())
    }

    /// Removes each *top-level* name the plugin introduced, pruning the
    /// whole subtree rooted there. A plugin that shares a top-level
    /// namespace with another plugin's skills will take those down too —
    /// this is intentional, kept deliberately rather than made more
    /// granular.
    pub fn forget(&self, owner: &str) {
        let mut tree = self.tree.write();
        let top_levels = owned_top_levels(&tree, owner);
        for key in top_levels {
            tree.remove(&key);
            tracing::info!(target: "aigis::shutdown", plugin = owner, path = %key, "forgot skill subtree");
        }
    }

    /// Asks the plugin registry to reload a live plugin by name.
    pub fn reload(&self, name: &str) -> bool {
        self.registry.request_reload(name)
    }

    /// Resolves a dotted path against the Skills Registry by descending one
    /// segment at a time.
    pub fn resolve(&self, path: &[String]) -> Resolved {
        let tree = self.tree.read();
        let Some((last, prefix)) = path.split_last() else {
            return Resolved::NotFound;
        };
        let mut cursor = &*tree;
        let mut owned_namespace;
        for segment in prefix {
            match cursor.get(segment) {
                Some(Node::Namespace(ns)) => {
                    owned_namespace = ns;
                    cursor = owned_namespace;
                }
                _ => return Resolved::NotFound,
            }
        }
        match cursor.get(last) {
            Some(Node::Leaf { value: LeafValue::Callable(f), .. }) => Resolved::Callable(f.clone()),
            Some(Node::Leaf { value: LeafValue::Value(v), .. }) => Resolved::Value(v.clone()),
            Some(Node::Namespace(_)) | None => Resolved::NotFound,
        }
    }

    /// Invokes a resolved callable with the given args/kwargs — shared by
    /// both the in-process call path and the broker, so both paths see the
    /// same return value for the same call.
    pub fn call(&self, path: &[String], args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, String> {
        match self.resolve(path) {
            Resolved::Callable(f) => {
                let log = PluginLog::new("broker");
                let call = aigis_plugin_api::SkillCall { args, kwargs, log: &log };
                f(call).map_err(|e| e.to_string())
            }
            Resolved::Value(v) => {
                if args.is_empty() && kwargs.is_empty() {
                    Ok(v)
                } else {
                    Err("arguments given for non-callable target".to_string())
                }
            }
            Resolved::NotFound => Err(format!("path not found: {}", path.join("."))),
        }
    }
}

fn insert_path(
    tree: &mut BTreeMap<String, Node>,
    path: &[String],
    owner: &str,
    value: SkillValue,
    log: &PluginLog,
) -> Result<(), LoadError> {
    let Some((last, prefix)) = path.split_last() else {
        return Err(LoadError::NamespaceLockError("empty skill path".to_string()));
    };
    let mut cursor = tree;
    for segment in prefix {
        let entry = cursor.entry(segment.clone()).or_insert_with(Node::empty_namespace);
        match entry {
            Node::Namespace(ns) => cursor = ns,
            Node::Leaf { .. } => {
                return Err(LoadError::NamespaceLockError(format!(
                    "cannot descend through leaf at '{segment}'"
                )))
            }
        }
    }
    let leaf_value = wrap(value, log);
    cursor.insert(last.clone(), Node::Leaf { owner: owner.to_string(), value: leaf_value });
    Ok(())
}

/// Wraps a callable leaf so calls receive the per-plugin log sink bound at
/// registration time. `aigis-plugin-api::SkillCall` carries `log` on every
/// call, so no fallback dispatch is needed here.
fn wrap(value: SkillValue, log: &PluginLog) -> LeafValue {
    match value {
        SkillValue::Value(v) => LeafValue::Value(v),
        SkillValue::Callable(f) => {
            let log = log.clone();
            let bound: SkillFn = Arc::new(move |call| {
                let rebound = aigis_plugin_api::SkillCall { args: call.args, kwargs: call.kwargs, log: &log };
                f(rebound)
            });
            LeafValue::Callable(bound)
        }
    }
}

fn owned_top_levels(tree: &BTreeMap<String, Node>, owner: &str) -> Vec<String> {
    tree.iter()
        .filter(|(_, node)| subtree_owned_by(node, owner))
        .map(|(k, _)| k.clone())
        .collect()
}

fn subtree_owned_by(node: &Node, owner: &str) -> bool {
    match node {
        Node::Leaf { owner: o, .. } => o == owner,
        Node::Namespace(ns) => ns.values().any(|child| subtree_owned_by(child, owner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn empty_registry() -> Arc<PluginRegistry> {
        PluginRegistry::for_tests()
    }

    #[test]
    fn learn_and_resolve_value() {
        let skills = Skills::new(empty_registry());
        let log = PluginLog::new("greeter");
        skills.learn("greeter", log, vec![SkillSpec::value("greeting.text", Value::String("hi".into()))]).unwrap();
        match skills.resolve(&["greeting".to_string(), "text".to_string()]) {
            Resolved::Value(Value::String(s)) => assert_eq!(s, "hi"),
            _ => panic!("expected resolved value"),
        }
    }

    #[test]
    fn forget_prunes_whole_top_level_subtree() {
        let skills = Skills::new(empty_registry());
        let log = PluginLog::new("greeter");
        skills
            .learn(
                "greeter",
                log,
                vec![
                    SkillSpec::value("greeting.text", Value::String("hi".into())),
                    SkillSpec::value("greeting.other.nested", Value::Bool(true)),
                ],
            )
            .unwrap();
        skills.forget("greeter");
        assert!(matches!(skills.resolve(&["greeting".to_string(), "text".to_string()]), Resolved::NotFound));
    }

    #[test]
    fn callable_resolves_and_invokes() {
        let skills = Skills::new(empty_registry());
        let log = PluginLog::new("greeter");
        skills
            .learn(
                "greeter",
                log,
                vec![SkillSpec::callable("hello", |_call| Ok(Value::String("hi".to_string())))],
            )
            .unwrap();
        let result = skills.call(&["hello".to_string()], &[], &Map::new()).unwrap();
        assert_eq!(result, Value::String("hi".to_string()));
    }

    #[test]
    fn call_with_args_against_a_value_leaf_is_an_error() {
        let skills = Skills::new(empty_registry());
        let log = PluginLog::new("greeter");
        skills.learn("greeter", log, vec![SkillSpec::value("greeting.text", Value::String("hi".into()))]).unwrap();

        let err = skills
            .call(&["greeting".to_string(), "text".to_string()], &[Value::Bool(true)], &Map::new())
            .unwrap_err();
        assert!(err.contains("non-callable"));

        // The registry tree itself is untouched by the rejected call.
        match skills.resolve(&["greeting".to_string(), "text".to_string()]) {
            Resolved::Value(Value::String(s)) => assert_eq!(s, "hi"),
            _ => panic!("expected resolved value"),
        }
    }
}
