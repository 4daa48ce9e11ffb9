//! # vigil-auth
//!
//! Auth Provider contract: turn [`Credentials`] into a bearer [`AccessToken`].
//!
//! Credential acquisition protocols are out of scope. The crate ships
//! [`StaticTokenProvider`] for pre-issued tokens and [`CachingProvider`],
//! which wraps any provider and reuses a token until it nears expiry.

#![deny(unsafe_code)]

pub mod errors;
pub mod provider;
pub mod token;

pub use errors::AuthError;
pub use provider::{AuthProvider, CachingProvider, StaticTokenProvider};
pub use token::{AccessToken, Credentials, TOKEN_EXPIRY_BUFFER};
