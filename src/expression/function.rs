//! Builtin function table for the telemetry expression language.
//!
//! A closed enumeration with typed signatures: argument count and runtime types
//! are checked before dispatch, and each function runs a domain validator ahead
//! of the underlying math so no NaN or infinity ever leaks into a payload.

use super::EvalError;
use crate::value::Value;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Declared type of a single function operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// Integer only.
    Int,
    /// Integer or float; coerced to `f64` for the call.
    Number,
    /// String only.
    Text,
    /// Any value.
    Any,
}

impl ArgType {
    fn name(self) -> &'static str {
        match self {
            ArgType::Int => "int",
            ArgType::Number => "number",
            ArgType::Text => "string",
            ArgType::Any => "any",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ArgType::Int => matches!(value, Value::Int(_)),
            ArgType::Number => value.is_numeric(),
            ArgType::Text => matches!(value, Value::String(_)),
            ArgType::Any => true,
        }
    }
}

/// The closed set of builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Rand,
    Str,
    Concat,
    RandStr,
    Now,
    Delta,
    ToInt,
    ToFloat,
    After,
    Abs,
    Pi,
}

/// Upper bound on `randstr` output, so a config typo cannot allocate gigabytes.
const MAX_RANDSTR_LEN: i64 = 4096;

impl FunctionType {
    /// Resolves a callee name; `None` means the function does not exist.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(FunctionType::Sin),
            "cos" => Some(FunctionType::Cos),
            "tan" => Some(FunctionType::Tan),
            "asin" => Some(FunctionType::Asin),
            "acos" => Some(FunctionType::Acos),
            "atan" => Some(FunctionType::Atan),
            "rand" => Some(FunctionType::Rand),
            "str" => Some(FunctionType::Str),
            "concat" => Some(FunctionType::Concat),
            "randstr" => Some(FunctionType::RandStr),
            "now" => Some(FunctionType::Now),
            "delta" => Some(FunctionType::Delta),
            "toInt" => Some(FunctionType::ToInt),
            "toFloat" => Some(FunctionType::ToFloat),
            "after" => Some(FunctionType::After),
            "abs" => Some(FunctionType::Abs),
            "pi" => Some(FunctionType::Pi),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionType::Sin => "sin",
            FunctionType::Cos => "cos",
            FunctionType::Tan => "tan",
            FunctionType::Asin => "asin",
            FunctionType::Acos => "acos",
            FunctionType::Atan => "atan",
            FunctionType::Rand => "rand",
            FunctionType::Str => "str",
            FunctionType::Concat => "concat",
            FunctionType::RandStr => "randstr",
            FunctionType::Now => "now",
            FunctionType::Delta => "delta",
            FunctionType::ToInt => "toInt",
            FunctionType::ToFloat => "toFloat",
            FunctionType::After => "after",
            FunctionType::Abs => "abs",
            FunctionType::Pi => "pi",
        }
    }

    /// Fixed operand-type signature.
    pub fn signature(self) -> &'static [ArgType] {
        match self {
            FunctionType::Sin
            | FunctionType::Cos
            | FunctionType::Tan
            | FunctionType::Asin
            | FunctionType::Acos
            | FunctionType::Atan
            | FunctionType::Abs
            | FunctionType::ToInt
            | FunctionType::ToFloat => &[ArgType::Number],
            FunctionType::Rand => &[ArgType::Number, ArgType::Number],
            FunctionType::Str => &[ArgType::Any],
            FunctionType::Concat => &[ArgType::Text, ArgType::Text],
            FunctionType::RandStr => &[ArgType::Int],
            FunctionType::Now | FunctionType::Pi => &[],
            FunctionType::Delta => &[ArgType::Text],
            FunctionType::After => &[ArgType::Text, ArgType::Number],
        }
    }

    /// Checks argument count and declared runtime types.
    fn check_args(self, args: &[Value]) -> Result<(), EvalError> {
        let signature = self.signature();
        if args.len() != signature.len() {
            return Err(EvalError::IncorrectArgumentCount {
                function: self.name(),
                expected: signature.len(),
                actual: args.len(),
            });
        }
        for (arg, expected) in args.iter().zip(signature) {
            if !expected.matches(arg) {
                return Err(EvalError::InvalidFunctionArgumentType {
                    function: self.name(),
                    expected: expected.name(),
                    actual: arg.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Domain/NaN/Inf validation, run before the underlying call.
    fn validate(self, args: &[Value]) -> Result<(), EvalError> {
        let invalid = |reason: String| EvalError::InvalidFunctionArgument {
            function: self.name(),
            reason,
        };

        match self {
            FunctionType::Sin
            | FunctionType::Cos
            | FunctionType::Tan
            | FunctionType::Atan
            | FunctionType::Abs
            | FunctionType::ToFloat => {
                let x = number(&args[0]);
                if !x.is_finite() {
                    return Err(invalid(format!("operand {} is not finite", x)));
                }
            }
            FunctionType::Asin | FunctionType::Acos => {
                let x = number(&args[0]);
                if !x.is_finite() || !(-1.0..=1.0).contains(&x) {
                    return Err(invalid(format!("operand {} outside [-1, 1]", x)));
                }
            }
            FunctionType::Rand => {
                let low = number(&args[0]);
                let high = number(&args[1]);
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid("bounds must be finite".to_string()));
                }
                if low >= high {
                    return Err(invalid(format!(
                        "low bound {} must be less than high bound {}",
                        low, high
                    )));
                }
            }
            FunctionType::RandStr => {
                let n = match &args[0] {
                    Value::Int(n) => *n,
                    _ => unreachable!("checked by signature"),
                };
                if !(1..=MAX_RANDSTR_LEN).contains(&n) {
                    return Err(invalid(format!(
                        "length {} outside [1, {}]",
                        n, MAX_RANDSTR_LEN
                    )));
                }
            }
            FunctionType::ToInt => {
                let x = number(&args[0]);
                if !x.is_finite() || x < i64::MIN as f64 || x > i64::MAX as f64 {
                    return Err(invalid(format!("{} not representable as int", x)));
                }
            }
            FunctionType::Delta | FunctionType::After => {
                if let Value::String(s) = &args[0] {
                    if DateTime::parse_from_rfc3339(s).is_err() {
                        return Err(invalid(format!("{:?} is not an RFC 3339 timestamp", s)));
                    }
                }
                if self == FunctionType::After {
                    let secs = number(&args[1]);
                    if !secs.is_finite() {
                        return Err(invalid("offset seconds must be finite".to_string()));
                    }
                }
            }
            FunctionType::Str | FunctionType::Concat | FunctionType::Now | FunctionType::Pi => {}
        }
        Ok(())
    }

    /// Checks, validates, and invokes the function.
    pub fn invoke(self, args: &[Value]) -> Result<Value, EvalError> {
        self.check_args(args)?;
        self.validate(args)?;

        let result = match self {
            FunctionType::Sin => Value::Float(number(&args[0]).sin()),
            FunctionType::Cos => Value::Float(number(&args[0]).cos()),
            FunctionType::Tan => Value::Float(number(&args[0]).tan()),
            FunctionType::Asin => Value::Float(number(&args[0]).asin()),
            FunctionType::Acos => Value::Float(number(&args[0]).acos()),
            FunctionType::Atan => Value::Float(number(&args[0]).atan()),
            FunctionType::Rand => {
                let low = number(&args[0]);
                let high = number(&args[1]);
                Value::Float(rand::thread_rng().gen_range(low..high))
            }
            FunctionType::Str => Value::String(args[0].to_string()),
            FunctionType::Concat => match (&args[0], &args[1]) {
                (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
                _ => unreachable!("checked by signature"),
            },
            FunctionType::RandStr => {
                let n = match &args[0] {
                    Value::Int(n) => *n as usize,
                    _ => unreachable!("checked by signature"),
                };
                let s: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(n)
                    .map(char::from)
                    .collect();
                Value::String(s)
            }
            FunctionType::Now => Value::String(Utc::now().to_rfc3339()),
            FunctionType::Delta => {
                let since = timestamp(&args[0]);
                let elapsed = Utc::now().signed_duration_since(since);
                Value::Float(elapsed.num_milliseconds() as f64 / 1000.0)
            }
            FunctionType::ToInt => Value::Int(number(&args[0]) as i64),
            FunctionType::ToFloat => Value::Float(number(&args[0])),
            FunctionType::After => {
                let base = timestamp(&args[0]);
                let offset_ms = (number(&args[1]) * 1000.0) as i64;
                let threshold = base + chrono::Duration::milliseconds(offset_ms);
                Value::Int(i64::from(Utc::now() >= threshold))
            }
            FunctionType::Abs => match &args[0] {
                Value::Int(i) => Value::Int(i.wrapping_abs()),
                Value::Float(f) => Value::Float(f.abs()),
                _ => unreachable!("checked by signature"),
            },
            FunctionType::Pi => Value::Float(std::f64::consts::PI),
        };
        Ok(result)
    }
}

fn number(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

fn timestamp(value: &Value) -> DateTime<Utc> {
    match value {
        // Parse failure was already rejected by validate().
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    }
}
