//! Topic registry: which payload schema each subscribed topic carries.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;
use vigil_core::{EntityId, PayloadSchema, Topic, TopicTemplate};

/// Maps exact topics to payload schemas.
///
/// Shared behind an `Arc`: the dispatcher reads while callers register more
/// topics at runtime.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    schemas: RwLock<HashMap<Topic, PayloadSchema>>,
}

impl TopicRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `topic` with `schema`, replacing any earlier schema.
    pub fn register(&self, topic: Topic, schema: PayloadSchema) {
        if let Some(previous) = self.schemas.write().insert(topic.clone(), schema) {
            if previous != schema {
                debug!(%topic, %previous, %schema, "topic schema replaced");
            }
        }
    }

    /// Expand `template` for every entity and register each topic.
    ///
    /// Returns the expanded topics in input order.
    pub fn register_template<'a>(
        &self,
        template: &TopicTemplate,
        entities: impl IntoIterator<Item = &'a EntityId>,
        schema: PayloadSchema,
    ) -> Vec<Topic> {
        let topics = template.expand_all(entities);
        let mut schemas = self.schemas.write();
        for topic in &topics {
            let _ = schemas.insert(topic.clone(), schema);
        }
        topics
    }

    /// Schema registered for `topic`.
    pub fn resolve(&self, topic: &Topic) -> Option<PayloadSchema> {
        self.schemas.read().get(topic).copied()
    }

    /// Whether `topic` has a schema.
    pub fn contains(&self, topic: &Topic) -> bool {
        self.schemas.read().contains_key(topic)
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}
