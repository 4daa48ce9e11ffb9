//! # vigil-directory
//!
//! Directory Service contract: resolve a group name to a [`GroupId`] and list
//! its member [`EntityId`]s.
//!
//! Paging of real directory lookups is out of scope; [`StaticDirectory`]
//! serves groups declared in settings.
//!
//! [`GroupId`]: vigil_core::GroupId
//! [`EntityId`]: vigil_core::EntityId

#![deny(unsafe_code)]

pub mod errors;
pub mod service;

pub use errors::DirectoryError;
pub use service::{DirectoryService, StaticDirectory};
