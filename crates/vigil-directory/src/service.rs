//! The [`DirectoryService`] seam and a settings-backed implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;
use vigil_core::{EntityId, GroupId};
use vigil_settings::DirectorySettings;

use crate::errors::DirectoryError;

/// Group lookup.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Resolve a group by exact name.
    async fn resolve_group(&self, name: &str) -> Result<GroupId, DirectoryError>;

    /// All members of a group, in directory order.
    async fn list_members(&self, group: &GroupId) -> Result<Vec<EntityId>, DirectoryError>;
}

/// In-memory directory.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    names: HashMap<String, GroupId>,
    members: HashMap<GroupId, Vec<EntityId>>,
}

impl StaticDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a group.
    #[must_use]
    pub fn with_group(
        mut self,
        name: impl Into<String>,
        id: GroupId,
        members: impl IntoIterator<Item = EntityId>,
    ) -> Self {
        let _ = self.names.insert(name.into(), id.clone());
        let _ = self.members.insert(id, members.into_iter().collect());
        self
    }

    /// Build from the `directory` settings section.
    pub fn from_settings(settings: &DirectorySettings) -> Self {
        settings
            .groups
            .iter()
            .fold(Self::new(), |dir, (name, group)| {
                dir.with_group(
                    name.clone(),
                    GroupId::new(group.id.clone()),
                    group.members.iter().map(|m| EntityId::new(m.clone())),
                )
            })
    }
}

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn resolve_group(&self, name: &str) -> Result<GroupId, DirectoryError> {
        let id = self
            .names
            .get(name)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))?;
        debug!(group = name, group_id = %id, "resolved group");
        Ok(id)
    }

    async fn list_members(&self, group: &GroupId) -> Result<Vec<EntityId>, DirectoryError> {
        self.members
            .get(group)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownGroup(group.clone()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use vigil_settings::GroupSettings;

    use super::*;

    fn directory() -> StaticDirectory {
        StaticDirectory::new().with_group(
            "support",
            GroupId::new("g-1"),
            [EntityId::new("42"), EntityId::new("43")],
        )
    }

    #[tokio::test]
    async fn resolves_exact_name() {
        let dir = directory();
        let id = dir.resolve_group("support").await.unwrap();
        assert_eq!(id.as_str(), "g-1");
        let members = dir.list_members(&id).await.unwrap();
        assert_eq!(members, vec![EntityId::new("42"), EntityId::new("43")]);
    }

    #[tokio::test]
    async fn name_match_is_exact() {
        let dir = directory();
        assert_matches!(
            dir.resolve_group("Support").await,
            Err(DirectoryError::NotFound(name)) if name == "Support"
        );
        assert_matches!(
            dir.resolve_group("supp").await,
            Err(DirectoryError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn unknown_group_id() {
        let err = directory()
            .list_members(&GroupId::new("nope"))
            .await
            .unwrap_err();
        assert_matches!(err, DirectoryError::UnknownGroup(_));
    }

    #[tokio::test]
    async fn built_from_settings() {
        let mut settings = DirectorySettings::default();
        let _ = settings.groups.insert(
            "ops".into(),
            GroupSettings {
                id: "g-ops".into(),
                members: vec!["7".into()],
            },
        );
        let dir = StaticDirectory::from_settings(&settings);
        let id = dir.resolve_group("ops").await.unwrap();
        assert_eq!(dir.list_members(&id).await.unwrap(), vec![EntityId::new("7")]);
    }
}
