//! Batch payload renderer: composition tree rows through a formatter.

use crate::composition::Node;
use crate::environment::Environment;
use crate::formatter::{FormatError, Formatter};
use crate::value::Value;
use std::sync::Arc;

/// Renders a batch of rows from a composition tree into formatted bytes.
///
/// For each row the renderer sets `x` to the row index, renders the tree, and
/// stores the result under `p` so the next row can refer to the previous one.
pub struct PayloadRenderer {
    node: Arc<Node>,
    formatter: Arc<dyn Formatter>,
}

impl PayloadRenderer {
    pub fn new(node: Arc<Node>, formatter: Arc<dyn Formatter>) -> Self {
        Self { node, formatter }
    }

    pub fn render(
        &self,
        env: &Environment,
        start: i64,
        rows: usize,
    ) -> Result<Vec<u8>, FormatError> {
        let mut rendered = Vec::with_capacity(rows);
        for idx in 0..rows {
            env.set("x", Value::Int(start + idx as i64));
            let row = self.node.render(env);
            rendered.push(row.clone());
            env.set("p", row);
        }
        self.formatter.format(&Value::Array(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{Collection, Label};
    use crate::expression::parse;
    use crate::formatter::JsonFormatter;

    fn renderer(node: Node) -> PayloadRenderer {
        PayloadRenderer::new(Arc::new(node), Arc::new(JsonFormatter::new()))
    }

    #[test]
    fn test_renders_row_index() {
        let node: Node = Collection::new()
            .with(Label::new("row", parse("x").unwrap().into()))
            .into();
        let bytes = renderer(node).render(&Environment::new(), 5, 3).unwrap();
        let decoded: Value = JsonFormatter::new().parse(&bytes).unwrap();
        match decoded {
            Value::Array(rows) => {
                assert_eq!(rows.len(), 3);
                for (offset, row) in rows.iter().enumerate() {
                    match row {
                        Value::Map(entries) => {
                            assert_eq!(entries["row"], Value::Int(5 + offset as i64))
                        }
                        other => panic!("expected map row, got {:?}", other),
                    }
                }
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_previous_render_available_under_p() {
        // Each row adds one to the previous row's counter.
        let node: Node = Collection::new()
            .with(Label::new("counter", parse("p.counter + 1").unwrap().into()))
            .into();
        let env = Environment::new();
        let mut seed = std::collections::HashMap::new();
        seed.insert("counter".to_string(), Value::Int(0));
        env.set("p", Value::Map(seed));

        let bytes = renderer(node).render(&env, 0, 3).unwrap();
        let decoded: Value = JsonFormatter::new().parse(&bytes).unwrap();
        match decoded {
            Value::Array(rows) => {
                for (offset, row) in rows.iter().enumerate() {
                    match row {
                        Value::Map(entries) => {
                            assert_eq!(entries["counter"], Value::Int(offset as i64 + 1))
                        }
                        other => panic!("expected map row, got {:?}", other),
                    }
                }
            }
            other => panic!("expected array, got {:?}", other),
        }
    }
}
