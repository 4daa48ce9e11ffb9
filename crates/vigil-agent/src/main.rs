//! # vigil-agent
//!
//! Watches presence and routing status for every member of one directory
//! group and logs each change.
//!
//! Settings come from `~/.vigil/settings.json` (or `--settings`), with
//! `VIGIL_*` environment overrides. The agent runs until ctrl-c, then shuts
//! the notification service down within `shutdownTimeoutMs`.

#![deny(unsafe_code)]

mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use vigil_auth::{AccessToken, AuthProvider, Credentials, StaticTokenProvider};
use vigil_core::logging::{LogFormat, init_subscriber};
use vigil_directory::StaticDirectory;
use vigil_notify::{
    HttpSubscriptionApi, NotificationService, SubscriptionConfig, WebSocketTransport,
};
use vigil_settings::VigilSettings;

/// Vigil agent.
#[derive(Parser, Debug)]
#[command(name = "vigil-agent", about = "Watch presence and routing status for a group")]
struct Cli {
    /// Directory group to watch.
    #[arg(long)]
    group: String,

    /// Settings file (default: ~/.vigil/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level override (e.g. "debug", "vigil_notify=trace").
    #[arg(long)]
    log_level: Option<String>,
}

fn load_settings(path: Option<&Path>) -> Result<VigilSettings> {
    match path {
        Some(path) => vigil_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => vigil_settings::load_settings().context("Failed to load settings"),
    }
}

fn auth_from_settings(settings: &VigilSettings) -> Result<(Arc<dyn AuthProvider>, Credentials)> {
    let Some(token) = settings.auth.access_token.clone() else {
        bail!("No access token configured (set auth.accessToken or VIGIL_ACCESS_TOKEN)");
    };
    let credentials = Credentials::new(
        settings.auth.client_id.clone(),
        settings.auth.client_secret.clone().unwrap_or_default(),
    );
    let provider = if settings.auth.client_id.is_empty() {
        StaticTokenProvider::new(AccessToken::new(token))
    } else {
        StaticTokenProvider::for_client(AccessToken::new(token), settings.auth.client_id.clone())
    };
    Ok((Arc::new(provider), credentials))
}

fn build_service(settings: &VigilSettings) -> Result<NotificationService> {
    let (auth, credentials) = auth_from_settings(settings)?;
    let transport = WebSocketTransport::new(
        settings.service.clone(),
        settings.channel.clone(),
        auth.clone(),
        credentials.clone(),
    );
    let api = HttpSubscriptionApi::new(settings.service.clone(), auth, credentials);
    Ok(NotificationService::new(
        Arc::new(transport),
        Arc::new(api),
        SubscriptionConfig::from_settings(settings),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = load_settings(args.settings.as_deref())?;
    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_subscriber(level, LogFormat::from_str_lossy(&settings.logging.format));

    let service = build_service(&settings)?;
    let directory = StaticDirectory::from_settings(&settings.directory);
    let members = watch::group_members(&directory, &args.group).await?;
    let topics = watch::register_watch(&service, &members)?;

    let shutdown_timeout = Duration::from_millis(settings.shutdown_timeout_ms);
    service.start();
    tracing::info!(group = %args.group, topics = topics.len(), "subscribing");
    watch::subscribe(&service, topics, shutdown_timeout).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        () = service.closed() => {
            tracing::warn!("notification service stopped on its own");
        }
    }

    service
        .shutdown(shutdown_timeout)
        .await
        .context("Notification service failed")?;
    Ok(())
}
