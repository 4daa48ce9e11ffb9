//! Directory error types.

use vigil_core::GroupId;

/// Errors returned by a [`DirectoryService`](crate::DirectoryService).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// No group matches the name exactly.
    #[error("group not found: {0}")]
    NotFound(String),

    /// The group id is not known to the directory.
    #[error("unknown group id: {0}")]
    UnknownGroup(GroupId),
}
