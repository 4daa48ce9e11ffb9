//! The [`AuthProvider`] seam and in-process implementations.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::AuthError;
use crate::token::{AccessToken, Credentials};

/// Turns credentials into a bearer token.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Obtain a token for `credentials`.
    async fn get_token(&self, credentials: &Credentials) -> Result<AccessToken, AuthError>;
}

/// Hands out a pre-issued token.
///
/// When constructed with [`for_client`](Self::for_client) the token is only
/// released to that client id.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: AccessToken,
    client_id: Option<String>,
}

impl StaticTokenProvider {
    /// Release `token` to any caller.
    pub fn new(token: AccessToken) -> Self {
        Self {
            token,
            client_id: None,
        }
    }

    /// Release `token` only to `client_id`.
    pub fn for_client(token: AccessToken, client_id: impl Into<String>) -> Self {
        Self {
            token,
            client_id: Some(client_id.into()),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_token(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
        if self.token.secret().is_empty() {
            return Err(AuthError::NotConfigured("empty access token".into()));
        }
        if let Some(expected) = &self.client_id {
            if expected != &credentials.client_id {
                return Err(AuthError::InvalidCredentials(format!(
                    "unknown client id '{}'",
                    credentials.client_id
                )));
            }
        }
        Ok(self.token.clone())
    }
}

/// Reuses the inner provider's token until it needs a refresh.
pub struct CachingProvider<P> {
    inner: P,
    cached: Mutex<Option<AccessToken>>,
}

impl<P: AuthProvider> CachingProvider<P> {
    /// Wrap `inner`.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached token so the next call asks the inner provider.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

#[async_trait]
impl<P: AuthProvider> AuthProvider for CachingProvider<P> {
    async fn get_token(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
        let now = Utc::now();
        let cached = self.cached.lock().clone();
        if let Some(token) = cached.filter(|t| !t.should_refresh(now)) {
            return Ok(token);
        }
        debug!(client_id = %credentials.client_id, "fetching access token");
        let token = self.inner.get_token(credentials).await?;
        *self.cached.lock() = Some(token.clone());
        Ok(token)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
