//! Receive-side outlets: where delivered payload bytes end up.

use crate::environment::Environment;
use crate::expression::Expr;
use crate::formatter::Formatter;
use crate::registry::Observable;
use crate::value::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OutletError {
    #[error("failed to decode received payload: {0}")]
    Decode(String),
}

pub trait Outlet: Send + Sync {
    fn observe(&self, payload: &[u8]) -> Result<(), OutletError>;
}

/// Decodes each payload, binds every row to `x`, evaluates a configured
/// expression against it, and reports numeric results to an observable.
///
/// Rows whose evaluation fails or yields a non-numeric value are skipped with
/// a log line; only a payload that fails to decode is an error.
pub struct ExpressionOutlet {
    expression: Expr,
    formatter: Arc<dyn Formatter>,
    observable: Arc<dyn Observable>,
}

impl ExpressionOutlet {
    pub fn new(
        expression: Expr,
        formatter: Arc<dyn Formatter>,
        observable: Arc<dyn Observable>,
    ) -> Self {
        Self {
            expression,
            formatter,
            observable,
        }
    }

    fn observe_row(&self, row: Value) {
        let env = Environment::new();
        env.set("x", row);
        match self.expression.evaluate(&env) {
            Ok(value) => match value.as_f64() {
                Some(value) => self.observable.observe(value),
                None => {
                    debug!(kind = value.type_name(), "outlet expression result is not numeric")
                }
            },
            Err(err) => warn!(error = %err, "outlet expression failed"),
        }
    }
}

impl Outlet for ExpressionOutlet {
    fn observe(&self, payload: &[u8]) -> Result<(), OutletError> {
        let decoded = self
            .formatter
            .parse(payload)
            .map_err(|e| OutletError::Decode(e.to_string()))?;
        match decoded {
            Value::Array(rows) => {
                for row in rows {
                    self.observe_row(row);
                }
            }
            row => self.observe_row(row),
        }
        Ok(())
    }
}

/// Discards every payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOutlet;

impl Outlet for NoopOutlet {
    fn observe(&self, _payload: &[u8]) -> Result<(), OutletError> {
        Ok(())
    }
}

/// Logs payload sizes; useful when inspecting a live broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingOutlet;

impl Outlet for LoggingOutlet {
    fn observe(&self, payload: &[u8]) -> Result<(), OutletError> {
        debug!(bytes = payload.len(), "received payload");
        Ok(())
    }
}
