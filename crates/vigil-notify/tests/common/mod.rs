//! Shared helpers for vigil-notify integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vigil_core::Topic;
use vigil_core::retry::RetryConfig;
use vigil_notify::mock::{MockSubscriptionApi, MockTransport};
use vigil_notify::{ChannelState, NotificationService, SubscriptionConfig};

pub fn topics(names: &[&str]) -> Vec<Topic> {
    names.iter().map(|n| Topic::new(*n)).collect()
}

pub fn config(max_attempts: u32, base_delay_ms: u64) -> SubscriptionConfig {
    SubscriptionConfig {
        retry: RetryConfig {
            max_attempts,
            base_delay_ms,
            max_delay_ms: base_delay_ms * 4,
            jitter_factor: 0.0,
        },
        max_topics_per_request: 1000,
    }
}

pub struct Harness {
    pub service: NotificationService,
    pub transport: MockTransport,
    pub api: MockSubscriptionApi,
}

pub fn harness(config: SubscriptionConfig) -> Harness {
    let transport = MockTransport::new();
    let api = MockSubscriptionApi::new();
    let service = NotificationService::new(
        Arc::new(transport.clone()),
        Arc::new(api.clone()),
        config,
    );
    Harness {
        service,
        transport,
        api,
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_state(service: &NotificationService, state: ChannelState) {
    let mut rx = service.manager().watch_state();
    let result = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state)).await;
    assert!(
        matches!(result, Ok(Ok(_))),
        "timed out waiting for state {state}, current {}",
        service.state()
    );
}
