//! The subscription endpoint seam.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vigil_core::{ConnectionId, NotifyError, RejectedTopic, Topic};

/// How a push changes the server's subscription list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Append topics.
    Add,
    /// Drop topics.
    Remove,
    /// Replace the whole list.
    Replace,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        })
    }
}

/// One push to the subscription endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Channel the list belongs to.
    pub connection_id: ConnectionId,
    /// List change.
    pub operation: Operation,
    /// Topics the change applies to.
    pub topics: Vec<Topic>,
}

/// Server verdict for one topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicResult {
    /// The topic.
    pub topic: Topic,
    /// Whether the server accepted it.
    pub accepted: bool,
    /// Why it was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-topic results of one or more pushes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// One entry per pushed topic.
    pub results: Vec<TopicResult>,
}

impl PushOutcome {
    /// Every topic accepted.
    pub fn accept_all<'a>(topics: impl IntoIterator<Item = &'a Topic>) -> Self {
        Self {
            results: topics
                .into_iter()
                .map(|topic| TopicResult {
                    topic: topic.clone(),
                    accepted: true,
                    reason: None,
                })
                .collect(),
        }
    }

    /// Every topic refused for the same reason.
    pub fn reject_all<'a>(topics: impl IntoIterator<Item = &'a Topic>, reason: &str) -> Self {
        Self {
            results: topics
                .into_iter()
                .map(|topic| TopicResult {
                    topic: topic.clone(),
                    accepted: false,
                    reason: Some(reason.to_owned()),
                })
                .collect(),
        }
    }

    /// Align server results with the request: one entry per requested topic,
    /// in request order. Topics the server did not mention count as accepted.
    pub fn normalize(topics: &[Topic], results: Vec<TopicResult>) -> Self {
        let mut by_topic: HashMap<Topic, TopicResult> = results
            .into_iter()
            .map(|r| (r.topic.clone(), r))
            .collect();
        Self {
            results: topics
                .iter()
                .map(|topic| {
                    by_topic.remove(topic).unwrap_or_else(|| TopicResult {
                        topic: topic.clone(),
                        accepted: true,
                        reason: None,
                    })
                })
                .collect(),
        }
    }

    /// Append another outcome.
    pub fn extend(&mut self, other: Self) {
        self.results.extend(other.results);
    }

    /// Accepted topics.
    pub fn accepted(&self) -> Vec<Topic> {
        self.results
            .iter()
            .filter(|r| r.accepted)
            .map(|r| r.topic.clone())
            .collect()
    }

    /// Refused topics with reasons.
    pub fn rejected(&self) -> Vec<RejectedTopic> {
        self.results
            .iter()
            .filter(|r| !r.accepted)
            .map(|r| RejectedTopic {
                topic: r.topic.clone(),
                reason: r.reason.clone().unwrap_or_else(|| "rejected".to_string()),
            })
            .collect()
    }

    /// Whether nothing was refused.
    pub fn is_fully_accepted(&self) -> bool {
        self.results.iter().all(|r| r.accepted)
    }
}

/// Pushes subscription list changes for a connection.
///
/// Refusals are reported in the [`PushOutcome`]; `Err` is reserved for
/// transport failures (`Connection`) and credential failures (`Auth`).
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    /// Send one request.
    async fn push(&self, request: &SubscriptionRequest) -> Result<PushOutcome, NotifyError>;
}
