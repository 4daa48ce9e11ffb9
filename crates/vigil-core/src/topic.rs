//! Topic keys and topic templates.
//!
//! A [`Topic`] is the literal string the notification service uses to name
//! one event stream (one entity, one event category). Resolution is always
//! exact-match on that string, so templated topics such as
//! `v2.users.{id}.presence` are expanded into concrete topics with
//! [`TopicTemplate::expand`] before they are registered or subscribed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Placeholder recognised inside a [`TopicTemplate`].
pub const ID_PLACEHOLDER: &str = "{id}";

/// A single event-stream key, e.g. `v2.users.42.presence`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap a literal topic string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the topic string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors from parsing a [`TopicTemplate`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// The pattern has no `{id}` placeholder or `*` segment.
    #[error("topic template {0:?} has no entity placeholder")]
    MissingPlaceholder(String),
    /// The pattern has more than one placeholder.
    #[error("topic template {0:?} has more than one entity placeholder")]
    MultiplePlaceholders(String),
}

/// A topic pattern with exactly one entity placeholder.
///
/// The placeholder is written `{id}` (`v2.users.{id}.presence`) or as a
/// whole `*` segment (`entity.*.presence`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicTemplate {
    prefix: String,
    suffix: String,
}

impl TopicTemplate {
    /// Parse a template pattern.
    pub fn new(pattern: &str) -> Result<Self, TemplateError> {
        let braces = pattern.matches(ID_PLACEHOLDER).count();
        let stars = pattern.split('.').filter(|seg| *seg == "*").count();

        match braces + stars {
            0 => Err(TemplateError::MissingPlaceholder(pattern.to_owned())),
            1 if braces == 1 => {
                let (prefix, suffix) = pattern
                    .split_once(ID_PLACEHOLDER)
                    .ok_or_else(|| TemplateError::MissingPlaceholder(pattern.to_owned()))?;
                Ok(Self {
                    prefix: prefix.to_owned(),
                    suffix: suffix.to_owned(),
                })
            }
            1 => {
                let segments: Vec<&str> = pattern.split('.').collect();
                let idx = segments
                    .iter()
                    .position(|seg| *seg == "*")
                    .ok_or_else(|| TemplateError::MissingPlaceholder(pattern.to_owned()))?;
                let mut prefix = segments[..idx].join(".");
                if idx > 0 {
                    prefix.push('.');
                }
                let mut suffix = String::new();
                if idx + 1 < segments.len() {
                    suffix.push('.');
                    suffix.push_str(&segments[idx + 1..].join("."));
                }
                Ok(Self { prefix, suffix })
            }
            _ => Err(TemplateError::MultiplePlaceholders(pattern.to_owned())),
        }
    }

    /// Substitute an entity id into the placeholder.
    pub fn expand(&self, entity: &EntityId) -> Topic {
        Topic(format!("{}{}{}", self.prefix, entity.as_str(), self.suffix))
    }

    /// Expand the template for every entity, preserving order.
    pub fn expand_all<'a>(&self, entities: impl IntoIterator<Item = &'a EntityId>) -> Vec<Topic> {
        entities.into_iter().map(|e| self.expand(e)).collect()
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ID_PLACEHOLDER}{}", self.prefix, self.suffix)
    }
}
