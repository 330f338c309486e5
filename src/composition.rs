//! Composition tree assembling leaf values into structured payloads.
//!
//! Internal nodes aggregate children into maps ([`Collection`]) or ordered
//! arrays ([`Array`]); leaves are expressions or constants. Edges are typed:
//! a [`Label`] attaches under a map, a [`Position`] under an array, so a
//! mismatched attachment is a compile error rather than a runtime assertion.
//!
//! Trees are built by consuming `with` calls (exclusive ownership during
//! construction) and then shared immutably, typically as `Arc<Node>`, for
//! concurrent rendering.

use crate::environment::Environment;
use crate::expression::Expr;
use crate::value::Value;
use std::collections::HashMap;
use tracing::warn;

/// A named edge attaching a child renderer under a [`Collection`].
#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub child: Node,
}

impl Label {
    pub fn new(name: impl Into<String>, child: Node) -> Self {
        Self {
            name: name.into(),
            child,
        }
    }
}

/// An indexed edge attaching a child renderer under an [`Array`].
#[derive(Debug, Clone)]
pub struct Position {
    pub index: usize,
    pub child: Node,
}

impl Position {
    pub fn new(index: usize, child: Node) -> Self {
        Self { index, child }
    }
}

/// Unordered map node. Label collisions overwrite silently; last write wins.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    labels: Vec<Label>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }
}

/// Ordered array node. Positions are re-sorted by index on every render, so
/// the output order is a pure function of the indices, not of attach order.
#[derive(Debug, Clone, Default)]
pub struct Array {
    positions: Vec<Position>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, position: Position) -> Self {
        self.positions.push(position);
        self
    }
}

/// A renderer in the composition tree.
#[derive(Debug, Clone)]
pub enum Node {
    Collection(Collection),
    Array(Array),
    Expression(Expr),
    Static(Value),
}

impl Node {
    /// Renders the subtree against `env`.
    ///
    /// An expression leaf that fails to evaluate renders [`Value::Null`] and
    /// logs the error; evaluation failures never propagate up through the tree.
    pub fn render(&self, env: &Environment) -> Value {
        match self {
            Node::Static(value) => value.clone(),
            Node::Expression(expr) => match expr.evaluate(env) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "expression evaluation failed, rendering null");
                    Value::Null
                }
            },
            Node::Collection(collection) => {
                let mut entries = HashMap::with_capacity(collection.labels.len());
                for label in &collection.labels {
                    entries.insert(label.name.clone(), label.child.render(env));
                }
                Value::Map(entries)
            }
            Node::Array(array) => {
                let mut ordered: Vec<&Position> = array.positions.iter().collect();
                ordered.sort_by_key(|position| position.index);
                Value::Array(ordered.iter().map(|p| p.child.render(env)).collect())
            }
        }
    }
}

impl From<Collection> for Node {
    fn from(collection: Collection) -> Self {
        Node::Collection(collection)
    }
}

impl From<Array> for Node {
    fn from(array: Array) -> Self {
        Node::Array(array)
    }
}

impl From<Expr> for Node {
    fn from(expr: Expr) -> Self {
        Node::Expression(expr)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Static(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse;

    #[test]
    fn test_static_leaf() {
        let node = Node::Static(Value::Int(1));
        assert_eq!(node.render(&Environment::new()), Value::Int(1));
    }

    #[test]
    fn test_collection_render() {
        let node: Node = Collection::new()
            .with(Label::new("a", Node::Static(Value::Int(1))))
            .into();
        match node.render(&Environment::new()) {
            Value::Map(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries["a"], Value::Int(1));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_collection_collision_last_write_wins() {
        let node: Node = Collection::new()
            .with(Label::new("a", Node::Static(Value::Int(1))))
            .with(Label::new("a", Node::Static(Value::Int(2))))
            .into();
        match node.render(&Environment::new()) {
            Value::Map(entries) => assert_eq!(entries["a"], Value::Int(2)),
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_array_order_independent_of_attach_order() {
        let node: Node = Array::new()
            .with(Position::new(1, Node::Static(Value::String("b".into()))))
            .with(Position::new(0, Node::Static(Value::String("a".into()))))
            .into();
        assert_eq!(
            node.render(&Environment::new()),
            Value::Array(vec![
                Value::String("a".into()),
                Value::String("b".into())
            ])
        );
    }

    #[test]
    fn test_expression_leaf() {
        let env = Environment::new();
        env.set("x", Value::Int(3));
        let node: Node = parse("x * x").unwrap().into();
        assert_eq!(node.render(&env), Value::Int(9));
    }

    #[test]
    fn test_failing_expression_renders_null_without_aborting_tree() {
        let node: Node = Collection::new()
            .with(Label::new("bad", parse("missing + 1").unwrap().into()))
            .with(Label::new("good", Node::Static(Value::Int(7))))
            .into();
        match node.render(&Environment::new()) {
            Value::Map(entries) => {
                assert_eq!(entries["bad"], Value::Null);
                assert_eq!(entries["good"], Value::Int(7));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_tree() {
        let inner: Node = Array::new()
            .with(Position::new(0, Node::Static(Value::Int(10))))
            .with(Position::new(1, parse("1 + 1").unwrap().into()))
            .into();
        let node: Node = Collection::new()
            .with(Label::new("readings", inner))
            .into();
        match node.render(&Environment::new()) {
            Value::Map(entries) => assert_eq!(
                entries["readings"],
                Value::Array(vec![Value::Int(10), Value::Int(2)])
            ),
            other => panic!("expected map, got {:?}", other),
        }
    }
}
