//! Twitch Helix / EventSub Smoke Test CLI
//!
//! Commands:
//! - `validate`: Validate the access token and print who it belongs to
//! - `users`: Resolve users by login
//! - `eventsub`: Open an EventSub session, subscribe, and collect notifications
//!
//! All commands read credentials from TWITCH_CLIENT_ID and TWITCH_ACCESS_TOKEN.
//!
//! # Usage
//! ```bash
//! TWITCH_CLIENT_ID=... TWITCH_ACCESS_TOKEN=...
//!
//! # Token check
//! tw_smoke validate
//!
//! # User lookup
//! tw_smoke users --login twitchdev --login twitch
//!
//! # EventSub session smoke test
//! tw_smoke eventsub --broadcaster-id 141981764 --out data/eventsub_raw.jsonl --limit 100
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use twitch_adapter::eventsub::{EventSubSession, SessionConfig, SessionHandlers, WelcomeEvent};
use twitch_adapter::helix::{Credentials, HelixClient};
use twitch_adapter::types::{Frame, MessageStats, SubscriptionDescriptor};
use twitch_adapter::{EVENTSUB_WSS_ENDPOINT, HELIX_API_BASE, OAUTH_BASE};

#[derive(Parser)]
#[command(name = "tw_smoke")]
#[command(about = "Twitch Helix / EventSub smoke test CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the access token
    Validate,

    /// Look up users by login name
    Users {
        /// Login name. Can specify multiple times.
        #[arg(long, required = true)]
        login: Vec<String>,
    },

    /// Open an EventSub session and collect notifications
    Eventsub {
        /// Broadcaster whose chat and stream status to subscribe to
        #[arg(long)]
        broadcaster_id: String,

        /// Output file path for raw JSONL
        #[arg(long, default_value = "data/eventsub_raw.jsonl")]
        out: PathBuf,

        /// Maximum notifications to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "100")]
        limit: u64,

        /// Delay before reopening a lost session (0 = no reconnect)
        #[arg(long, default_value = "500")]
        reconnect_delay_ms: u64,

        /// Requested keepalive interval in seconds (10-600)
        #[arg(long)]
        keepalive_secs: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    let credentials = load_credentials()?;

    match cli.command {
        Commands::Validate => run_validate(credentials).await,
        Commands::Users { login } => run_users(credentials, login).await,
        Commands::Eventsub { broadcaster_id, out, limit, reconnect_delay_ms, keepalive_secs } => {
            let config = SessionConfig { reconnect_delay_ms, keepalive_timeout_secs: keepalive_secs, ..Default::default() };
            run_eventsub_smoke(credentials, broadcaster_id, out, limit, config, shutdown).await
        }
    }
}

fn load_credentials() -> Result<Credentials> {
    let credentials = match Credentials::from_env() {
        Some(c) => c,
        None => {
            error!("Missing credentials. Set environment variables:");
            error!("  TWITCH_CLIENT_ID");
            error!("  TWITCH_ACCESS_TOKEN");
            anyhow::bail!("Missing credentials");
        }
    };

    if !credentials.is_valid() {
        error!("Invalid credentials - one or more fields are empty");
        anyhow::bail!("Invalid credentials");
    }

    info!("Credentials loaded: {:?}", credentials);
    Ok(credentials)
}

async fn run_validate(credentials: Credentials) -> Result<()> {
    info!("=== Token Validation ===");
    info!("OAuth base: {}", OAUTH_BASE);
    info!("");

    let client = HelixClient::new(credentials)?;
    let validation = client.validate_token().await.context("Token validation failed")?;

    info!("Client ID: {}", validation.client_id);
    info!("Login: {}", validation.login.as_deref().unwrap_or("(app token)"));
    info!("User ID: {}", validation.user_id.as_deref().unwrap_or("-"));
    info!("Expires in: {}s", validation.expires_in);
    info!("Scopes:");
    for scope in &validation.scopes {
        info!("  {}", scope);
    }

    Ok(())
}

async fn run_users(credentials: Credentials, logins: Vec<String>) -> Result<()> {
    info!("=== User Lookup ===");
    info!("Base URL: {}", HELIX_API_BASE);
    info!("");

    let client = HelixClient::new(credentials)?;
    let logins: Vec<&str> = logins.iter().map(String::as_str).collect();
    let users = client.get_users(&[], &logins).await.context("User lookup failed")?;

    if users.is_empty() {
        warn!("No users found");
    }
    for user in &users {
        info!("{} ({}): id={} type={:?}", user.display_name, user.login, user.id, user.broadcaster_type);
    }

    println!("{}", serde_json::to_string_pretty(&users)?);
    Ok(())
}

async fn run_eventsub_smoke(
    credentials: Credentials,
    broadcaster_id: String,
    out: PathBuf,
    limit: u64,
    config: SessionConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    info!("=== EventSub Session Smoke Test ===");
    info!("Endpoint: {}", config.connect_url());
    info!("Broadcaster ID: {}", broadcaster_id);
    info!("Output: {}", out.display());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Reconnect delay: {}ms (0 = disabled)", config.reconnect_delay_ms);
    info!("Press Ctrl+C to stop");
    info!("");

    let client = Arc::new(HelixClient::new(credentials)?);

    // Chat subscriptions are read as the token owner
    let validation = client.validate_token().await.context("Token validation failed")?;
    let user_id = validation.user_id.context("channel.chat.message needs a user access token")?;

    // Ensure output directory exists
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(&out).await.context("Failed to create output file")?;

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();

    let subscriber = client.clone();
    let handlers = SessionHandlers::new()
        .on_message(move |frame| {
            let _ = frame_tx.send(frame);
            async {}
        })
        .on_welcome(move |welcome| {
            let client = subscriber.clone();
            let broadcaster_id = broadcaster_id.clone();
            let user_id = user_id.clone();
            async move {
                if welcome.is_reconnect {
                    info!("Session {} continued, keeping subscriptions", welcome.session.id);
                    return;
                }
                subscribe_all(&client, &welcome, &broadcaster_id, &user_id).await;
            }
        })
        .on_reconnect(|session| async move {
            info!("Reconnect requested, new session {}", session.id);
        })
        .on_revocation(|subscription| async move {
            warn!("Subscription revoked: {} ({})", subscription.subscription_type, subscription.status);
        })
        .on_close(|event| async move {
            warn!("Session closed: {}", event);
        });

    info!("Connecting to {}", EVENTSUB_WSS_ENDPOINT);
    let session = EventSubSession::new(config, handlers).start();

    let mut stats = MessageStats::new();
    let mut collected: u64 = 0;
    let started = Utc::now();

    while !shutdown.load(Ordering::Relaxed) {
        if limit > 0 && collected >= limit {
            info!("Reached notification limit: {}", limit);
            break;
        }

        // Wake up periodically to observe the shutdown flag
        let frame = match tokio::time::timeout(Duration::from_secs(1), frame_rx.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Session ended");
                break;
            }
            Err(_) => continue,
        };

        stats.record(&frame);
        if twitch_adapter::eventsub::classify::is_notification(&frame) {
            let line = serde_json::to_string(&frame)?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            collected += 1;

            if collected % 10 == 0 {
                debug!("Collected {} notifications, {} unknown", collected, stats.unknown_type_count);
            }
        }
    }

    session.close().await;
    file.flush().await?;

    let status = session.status();
    info!("");
    info!("=== Summary ===");
    info!("Runtime: {}s", (Utc::now() - started).num_seconds());
    info!("First connected at: {:?}", status.first_connected_at);
    info!("Total messages: {}", stats.total_messages);
    info!("Parsed OK: {}", stats.parsed_ok);
    info!("Notifications written: {}", collected);
    info!("Unknown type count: {}", stats.unknown_type_count);
    info!("Last message type: {:?}", stats.last_message_type);
    info!("");
    info!("Message type distribution:");
    let mut types: Vec<_> = stats.type_counts.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1));
    for (msg_type, count) in types {
        info!("  {}: {}", msg_type, count);
    }
    info!("");
    info!("Output written to: {}", out.display());

    Ok(())
}

/// Register the smoke-test subscriptions on a fresh session
async fn subscribe_all(client: &HelixClient, welcome: &WelcomeEvent, broadcaster_id: &str, user_id: &str) {
    let transport = welcome.transport();
    let descriptors = [
        SubscriptionDescriptor::channel_chat_message(broadcaster_id, user_id, transport.clone()),
        SubscriptionDescriptor::stream_online(broadcaster_id, transport.clone()),
        SubscriptionDescriptor::stream_offline(broadcaster_id, transport),
    ];

    for descriptor in &descriptors {
        if let Err(e) = client.create_eventsub_subscription(descriptor).await {
            error!("Failed to subscribe to {}: {}", descriptor.subscription_type, e);
        }
    }
}
