//! HTTP subscription endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use vigil_auth::{AuthProvider, Credentials};
use vigil_core::NotifyError;
use vigil_settings::ServiceSettings;

use super::api::{PushOutcome, SubscriptionApi, SubscriptionRequest, TopicResult};

#[derive(Debug, Default, Deserialize)]
struct PushResponse {
    #[serde(default)]
    results: Vec<TopicResult>,
}

/// Pushes subscription changes to `{apiBaseUrl}{subscriptionsPath}`.
///
/// Status mapping: 2xx parses per-topic results (an empty or missing list
/// means everything was accepted); 401/403 is `Auth`; 404, 408 and 429 are
/// request-level and map to `Connection` like 5xx and transport errors; any
/// other 4xx refuses every topic in the request.
pub struct HttpSubscriptionApi {
    http: reqwest::Client,
    service: ServiceSettings,
    auth: Arc<dyn AuthProvider>,
    credentials: Credentials,
}

impl HttpSubscriptionApi {
    /// Build the client.
    pub fn new(
        service: ServiceSettings,
        auth: Arc<dyn AuthProvider>,
        credentials: Credentials,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            service,
            auth,
            credentials,
        }
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }
}

/// Client errors that say nothing about the topics: the channel is unknown,
/// the request timed out, or the caller is being throttled. Retrying on a
/// fresh channel may succeed.
fn is_request_level(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    )
}

#[async_trait]
impl SubscriptionApi for HttpSubscriptionApi {
    async fn push(&self, request: &SubscriptionRequest) -> Result<PushOutcome, NotifyError> {
        let token = self.auth.get_token(&self.credentials).await?;
        let url = self
            .service
            .subscriptions_url(request.connection_id.as_str());
        debug!(
            %url,
            operation = %request.operation,
            topic_count = request.topics.len(),
            "pushing subscription change"
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .timeout(self.service.request_timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| NotifyError::Connection(format!("subscription push: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NotifyError::Auth(format!(
                "subscription endpoint returned {status}"
            )));
        }
        if status.is_server_error() || is_request_level(status) {
            return Err(NotifyError::Connection(format!(
                "subscription endpoint returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| NotifyError::Connection(format!("subscription response: {e}")))?;

        if status.is_client_error() {
            let body = body.trim();
            let reason = if body.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {body}")
            };
            return Ok(PushOutcome::reject_all(&request.topics, &reason));
        }
        if !status.is_success() {
            return Err(NotifyError::Connection(format!(
                "unexpected subscription status {status}"
            )));
        }

        let parsed = if body.trim().is_empty() {
            PushResponse::default()
        } else {
            serde_json::from_str::<PushResponse>(&body).map_err(|e| {
                NotifyError::Connection(format!("invalid subscription response: {e}"))
            })?
        };
        Ok(PushOutcome::normalize(&request.topics, parsed.results))
    }
}
