//! Topic component: renders a fixed topic name and forwards observations.

use crate::registry::Observable;
use std::sync::Arc;

/// A publish/subscribe topic paired with its latency observable.
pub struct Topic {
    topic: String,
    observable: Arc<dyn Observable>,
}

impl Topic {
    pub fn new(topic: impl Into<String>, observable: Arc<dyn Observable>) -> Self {
        Self {
            topic: topic.into(),
            observable,
        }
    }

    /// Expands a topic pattern, substituting `{site}` and `{id}` placeholders.
    pub fn from_pattern(
        pattern: &str,
        site: &str,
        id: &str,
        observable: Arc<dyn Observable>,
    ) -> Self {
        let topic = pattern.replace("{site}", site).replace("{id}", id);
        Self::new(topic, observable)
    }

    pub fn render(&self) -> &str {
        &self.topic
    }
}

impl Observable for Topic {
    fn observe(&self, value: f64) {
        self.observable.observe(value);
    }
}
