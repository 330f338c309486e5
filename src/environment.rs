//! Mutable per-device key/value context consumed by renders.

use crate::value::Value;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Shared variable environment for one publisher or subscriber.
///
/// Conventional keys: `x` (current row index), `p` (previous render), `site`,
/// `id`, and `start` (creation time, RFC 3339). The render path reads while the
/// publisher writes, so access goes through a read/write lock.
#[derive(Debug, Default)]
pub struct Environment {
    env: RwLock<HashMap<String, Value>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an environment pre-populated with the conventional device keys.
    pub fn for_device(id: &str, site: &str) -> Self {
        let env = Self::new();
        env.set("id", Value::String(id.to_string()));
        env.set("site", Value::String(site.to_string()));
        env.set("start", Value::String(Utc::now().to_rfc3339()));
        env
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.env.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.env.write().insert(key.to_string(), value);
    }
}
