//! Wiring a directory group onto a notification service.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vigil_core::{
    EntityId, EventKind, EventPayload, NotifyError, PayloadSchema, Topic, TopicTemplate,
};
use vigil_directory::DirectoryService;
use vigil_notify::NotificationService;

/// Per-member presence topic.
pub const PRESENCE_TEMPLATE: &str = "v2.users.{id}.presence";

/// Per-member routing status topic.
pub const ROUTING_TEMPLATE: &str = "v2.users.{id}.routingStatus";

/// Resolve `group` and return its members.
pub async fn group_members(directory: &dyn DirectoryService, group: &str) -> Result<Vec<EntityId>> {
    let id = directory
        .resolve_group(group)
        .await
        .with_context(|| format!("Failed to resolve group '{group}'"))?;
    let members = directory
        .list_members(&id)
        .await
        .with_context(|| format!("Failed to list members of group '{group}'"))?;
    info!(group, group_id = %id, members = members.len(), "resolved group");
    Ok(members)
}

/// Register presence and routing topics for `members` and attach logging
/// handlers. Returns every registered topic.
pub fn register_watch(service: &NotificationService, members: &[EntityId]) -> Result<Vec<Topic>> {
    let registry = service.registry();
    let mut topics = Vec::with_capacity(members.len() * 2);
    for (pattern, schema) in [
        (PRESENCE_TEMPLATE, PayloadSchema::Presence),
        (ROUTING_TEMPLATE, PayloadSchema::RoutingStatus),
    ] {
        let template = TopicTemplate::new(pattern)
            .with_context(|| format!("Invalid topic template '{pattern}'"))?;
        topics.extend(registry.register_template(&template, members, schema));
    }

    service.register_handler(EventKind::Presence, |envelope| {
        if let EventPayload::Presence(event) = &envelope.payload {
            info!(topic = %envelope.topic, status = %event.status, "presence changed");
        }
    });
    service.register_handler(EventKind::RoutingStatus, |envelope| {
        if let EventPayload::RoutingStatus(event) = &envelope.payload {
            info!(topic = %envelope.topic, status = %event.status, "routing status changed");
        }
    });
    Ok(topics)
}

/// Subscribe the watched topics.
///
/// Refused topics are logged and the rest subscribed again, since a refusal
/// rolls back the whole call. Any other failure leaves nothing to watch: the
/// service is shut down and the error returned.
pub async fn subscribe(
    service: &NotificationService,
    topics: Vec<Topic>,
    shutdown_timeout: Duration,
) -> Result<()> {
    let result = match service.add(topics.clone()).await {
        Err(NotifyError::Subscription { rejected }) => {
            for refused in &rejected {
                warn!(
                    topic = %refused.topic,
                    reason = %refused.reason,
                    "topic refused, not watching it"
                );
            }
            let remaining: Vec<Topic> = topics
                .into_iter()
                .filter(|t| !rejected.iter().any(|r| &r.topic == t))
                .collect();
            service.add(remaining).await
        }
        other => other,
    };

    let Err(e) = result else {
        return Ok(());
    };
    if let Err(stop) = service.shutdown(shutdown_timeout).await {
        warn!(error = %stop, "notification service stopped with an error");
    }
    Err(e).context("Initial subscribe failed")
}
