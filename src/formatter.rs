//! Payload serialization boundary.
//!
//! The engine renders [`Value`] trees; a [`Formatter`] turns them into wire
//! bytes and back. Only JSON ships here; other encodings live behind the same
//! trait in downstream collaborators.

use crate::value::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

pub trait Formatter: Send + Sync {
    fn format(&self, value: &Value) -> Result<Vec<u8>, FormatError>;
    fn parse(&self, payload: &[u8]) -> Result<Value, FormatError>;
}

/// JSON formatter backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, value: &Value) -> Result<Vec<u8>, FormatError> {
        serde_json::to_vec(value).map_err(|e| FormatError::Encode(e.to_string()))
    }

    fn parse(&self, payload: &[u8]) -> Result<Value, FormatError> {
        serde_json::from_slice(payload).map_err(|e| FormatError::Decode(e.to_string()))
    }
}
