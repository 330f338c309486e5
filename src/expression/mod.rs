//! The telemetry expression language: AST and evaluator.
//!
//! Expressions are parsed once at configuration time ([`parse`]) and evaluated
//! on every render against a device [`Environment`]. Evaluation never panics on
//! malformed input; every failure path is a typed [`EvalError`].

pub mod function;
pub mod parser;

pub use function::{ArgType, FunctionType};
pub use parser::{parse, ParseError};

use crate::environment::Environment;
use crate::value::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

/// Immutable expression AST, produced once by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        function: FunctionType,
        args: Vec<Expr>,
    },
    Selector {
        base: Box<Expr>,
        field: String,
    },
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("binary expression operands must both be int or both be float")]
    BinaryExpressionMustBeNumeric,

    #[error("unary expression operand must be numeric")]
    UnaryExpressionMustBeNumeric,

    #[error("function {function} expects {expected} argument(s), got {actual}")]
    IncorrectArgumentCount {
        function: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("function {function} expects a {expected} argument, got {actual}")]
    InvalidFunctionArgumentType {
        function: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid argument for function {function}: {reason}")]
    InvalidFunctionArgument {
        function: &'static str,
        reason: String,
    },

    #[error("selector base must be a map")]
    InvalidSelector,

    #[error("unknown identifier {0:?}")]
    UnknownIdentifier(String),
}

impl Expr {
    /// Recursively evaluates the expression against `env`.
    pub fn evaluate(&self, env: &Environment) -> Result<Value, EvalError> {
        match self {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Ident(name) => env
                .get(name)
                .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
            Expr::Selector { base, field } => match base.evaluate(env)? {
                Value::Map(entries) => entries
                    .get(field)
                    .cloned()
                    .ok_or_else(|| EvalError::UnknownIdentifier(field.clone())),
                _ => Err(EvalError::InvalidSelector),
            },
            Expr::Unary { op: UnaryOp::Neg, operand } => match operand.evaluate(env)? {
                Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
                Value::Float(f) => Ok(Value::Float(-f)),
                _ => Err(EvalError::UnaryExpressionMustBeNumeric),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(env)?;
                let rhs = rhs.evaluate(env)?;
                evaluate_binary(*op, lhs, rhs)
            }
            Expr::Call { function, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(arg.evaluate(env)?);
                }
                function.invoke(&evaluated)
            }
        }
    }
}

/// Binary arithmetic requires both operands to share one numeric type.
///
/// Division by zero yields `0` rather than an error; this matches the original
/// simulator's numeric policy and is pinned by tests.
fn evaluate_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_div(b)
                }
            }
            BinaryOp::Rem => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_rem(b)
                }
            }
            BinaryOp::Pow => int_pow(a, b),
        })),
        (Value::Float(a), Value::Float(b)) => match op {
            BinaryOp::Add => Ok(Value::Float(a + b)),
            BinaryOp::Sub => Ok(Value::Float(a - b)),
            BinaryOp::Mul => Ok(Value::Float(a * b)),
            BinaryOp::Div => Ok(Value::Float(if b == 0.0 { 0.0 } else { a / b })),
            BinaryOp::Pow => Ok(Value::Float(a.powf(b))),
            // Modulo is integer-only.
            BinaryOp::Rem => Err(EvalError::BinaryExpressionMustBeNumeric),
        },
        _ => Err(EvalError::BinaryExpressionMustBeNumeric),
    }
}

/// Integer exponentiation by repeated multiplication. A negative exponent
/// leaves the accumulator untouched and yields 1.
fn int_pow(base: i64, exponent: i64) -> i64 {
    let mut result = 1i64;
    let mut i = 0;
    while i < exponent {
        result = result.wrapping_mul(base);
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval(src: &str) -> Result<Value, EvalError> {
        parse(src).unwrap().evaluate(&Environment::new())
    }

    fn eval_with(src: &str, env: &Environment) -> Result<Value, EvalError> {
        parse(src).unwrap().evaluate(env)
    }

    #[test]
    fn test_int_addition() {
        assert_eq!(eval("1 + 1").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_string_plus_int_fails() {
        assert_eq!(
            eval("'a' + 1").unwrap_err(),
            EvalError::BinaryExpressionMustBeNumeric
        );
    }

    #[test]
    fn test_mixed_int_float_fails() {
        assert_eq!(
            eval("1 + 1.0").unwrap_err(),
            EvalError::BinaryExpressionMustBeNumeric
        );
    }

    #[test]
    fn test_int_power() {
        assert_eq!(eval("2 ^ 3").unwrap(), Value::Int(8));
        assert_eq!(eval("2 ^ 0").unwrap(), Value::Int(1));
        // Negative exponent: the multiplication loop never runs.
        assert_eq!(eval("2 ^ -1").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_float_power() {
        assert_eq!(eval("2.0 ^ 3.0").unwrap(), Value::Float(8.0));
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        assert_eq!(eval("7 / 0").unwrap(), Value::Int(0));
        assert_eq!(eval("7.5 / 0.0").unwrap(), Value::Float(0.0));
        assert_eq!(eval("7 % 0").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_modulo_is_integer_only() {
        assert_eq!(eval("7 % 3").unwrap(), Value::Int(1));
        assert_eq!(
            eval("7.0 % 3.0").unwrap_err(),
            EvalError::BinaryExpressionMustBeNumeric
        );
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-(3 + 4)").unwrap(), Value::Int(-7));
        assert_eq!(
            eval("-'a'").unwrap_err(),
            EvalError::UnaryExpressionMustBeNumeric
        );
    }

    #[test]
    fn test_identifier_lookup() {
        let env = Environment::new();
        env.set("x", Value::Int(10));
        assert_eq!(eval_with("x * 2", &env).unwrap(), Value::Int(20));
        assert_eq!(
            eval_with("y", &env).unwrap_err(),
            EvalError::UnknownIdentifier("y".into())
        );
    }

    #[test]
    fn test_selector() {
        let env = Environment::new();
        let mut reading = HashMap::new();
        reading.insert("value".to_string(), Value::Float(21.5));
        let mut previous = HashMap::new();
        previous.insert("reading".to_string(), Value::Map(reading));
        env.set("p", Value::Map(previous));

        assert_eq!(eval_with("p.reading.value", &env).unwrap(), Value::Float(21.5));
        assert_eq!(
            eval_with("p.missing", &env).unwrap_err(),
            EvalError::UnknownIdentifier("missing".into())
        );

        env.set("n", Value::Int(1));
        assert_eq!(eval_with("n.field", &env).unwrap_err(), EvalError::InvalidSelector);
    }

    #[test]
    fn test_asin_out_of_domain_never_yields_nan() {
        let err = eval("asin(2)").unwrap_err();
        assert!(matches!(err, EvalError::InvalidFunctionArgument { function: "asin", .. }));
    }

    #[test]
    fn test_nested_function_calls() {
        let env = Environment::new();
        env.set("x", Value::Int(0));
        let v = eval_with("sin(toFloat(x) * pi() / 180.0)", &env).unwrap();
        assert_eq!(v, Value::Float(0.0));
    }
}
