//! Responder daemon: wires rules, stores, engine, and the Telegram channel,
//! and serves the HTTP surface (health + webhook) on a single port.

use crate::admin::{self, AdminSurface};
use crate::channels::{InboundEvent, SendPort, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::cooldown::{CooldownTracker, SWEEP_FACTOR};
use crate::dispatch::{DispatchEngine, Outcome};
use crate::rules::RuleSet;
use crate::state::ConversationStateStore;
use crate::storage::JsonStateFile;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INBOUND_BUFFER: usize = 64;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
struct DaemonState {
    config: Arc<Config>,
    rule_count: usize,
    inbound_tx: mpsc::Sender<InboundEvent>,
    telegram: Arc<TelegramChannel>,
}

/// Run the responder daemon until SIGINT/SIGTERM.
pub async fn run_daemon(config: Config, config_path: PathBuf) -> Result<()> {
    let rules_path = config::resolve_rules_path(&config, &config_path);
    if !rules_path.exists() {
        anyhow::bail!(
            "rules file not found: {} (run `chatrep init` first)",
            rules_path.display()
        );
    }
    let rules = Arc::new(
        RuleSet::load(&rules_path)
            .with_context(|| format!("loading rules from {}", rules_path.display()))?,
    );
    log::info!("loaded {} rules from {}", rules.len(), rules_path.display());

    let state_path = config::resolve_state_path(&config, &config_path);
    let state_store = Arc::new(ConversationStateStore::new(Arc::new(JsonStateFile::new(
        &state_path,
    ))));
    let cooldown = Arc::new(CooldownTracker::new());
    let settings = config.responder.engine_settings();

    let telegram = Arc::new(TelegramChannel::new(config::resolve_telegram_token(&config)));
    let sender: Arc<dyn SendPort> = telegram.clone();
    let engine = Arc::new(DispatchEngine::new(
        rules.clone(),
        cooldown.clone(),
        state_store.clone(),
        sender.clone(),
        settings.clone(),
    ));
    let admin = Arc::new(AdminSurface::new(
        state_store,
        rules.clone(),
        settings.cooldown_window,
        &config.channels.telegram.admin_usernames,
    ));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_BUFFER);

    // One task per event: the human-like delay suspends only that event's
    // handling, never the loop's ability to pick up the next one.
    {
        let engine = engine.clone();
        let admin = admin.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                let engine = engine.clone();
                let admin = admin.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    process_event(engine, admin, sender, event).await;
                });
            }
        });
    }

    // Periodic sweep keeps the cooldown map bounded over long uptimes.
    // A zero window means cooldowns are off and there is nothing to sweep.
    if !settings.cooldown_window.is_zero() {
        let cooldown = cooldown.clone();
        let window = settings.cooldown_window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window * SWEEP_FACTOR);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cooldown.sweep(Instant::now(), window).await;
                if removed > 0 {
                    log::debug!(
                        "cooldown sweep: removed {} stale entries, {} remain",
                        removed,
                        cooldown.len().await
                    );
                }
            }
        });
    }

    let webhook_url = config.channels.telegram.webhook_url.clone();
    let mut poll_handle: Option<JoinHandle<()>> = None;
    let mut webhook_active = false;
    if config::resolve_telegram_token(&config).is_some() {
        if let Some(ref url) = webhook_url {
            if let Err(e) = telegram.resolve_self_id().await {
                log::warn!("telegram getMe failed, own messages may not be filtered: {}", e);
            }
            let secret = config.channels.telegram.webhook_secret.as_deref();
            if let Err(e) = telegram.set_webhook(url, secret).await {
                log::warn!("telegram set_webhook failed: {}", e);
            } else {
                log::info!("telegram channel registered (webhook mode): {}", url);
                webhook_active = true;
            }
        } else {
            poll_handle = Some(telegram.clone().start_inbound(inbound_tx.clone()));
            log::info!("telegram channel registered and getUpdates loop started");
        }
    } else {
        log::warn!("no telegram bot token configured; responder has no inbound channel");
    }

    let daemon_state = DaemonState {
        config: Arc::new(config.clone()),
        rule_count: rules.len(),
        inbound_tx,
        telegram: telegram.clone(),
    };
    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(daemon_state);

    let bind_addr = format!("{}:{}", config.daemon.bind, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("daemon listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(telegram, poll_handle, webhook_active))
        .await
        .context("daemon server exited")?;
    log::info!("daemon stopped");
    Ok(())
}

/// Route one inbound event: admin commands from allowlisted senders get a
/// direct reply; everything else goes through the dispatch engine.
async fn process_event(
    engine: Arc<DispatchEngine>,
    admin: Arc<AdminSurface>,
    sender: Arc<dyn SendPort>,
    event: InboundEvent,
) {
    if event.is_group() && admin.is_admin(event.sender_username.as_deref()) {
        if let Some(cmd) = admin::parse_command(&event.text) {
            let reply = admin.execute(cmd, &event).await;
            if let Err(e) = sender
                .send(&event.conversation_id, &reply, Some(event.message_id))
                .await
            {
                log::warn!("admin reply failed: chat={} err={}", event.conversation_id, e);
            }
            return;
        }
    }
    match engine.handle(&event).await {
        Ok(Outcome::Sent) => {
            log::debug!("event handled: chat={} -> sent", event.conversation_id);
        }
        Ok(Outcome::Suppressed(reason)) => {
            log::debug!(
                "event handled: chat={} -> suppressed ({:?})",
                event.conversation_id,
                reason
            );
        }
        // Transient per-event failure (state storage unavailable). Later
        // events get a fresh hydration attempt.
        Err(e) => {
            log::warn!("event dropped: chat={} err={}", event.conversation_id, e);
        }
    }
}

/// Future that completes when the process should shut down (SIGINT or
/// SIGTERM). Stops the poll loop, removes the webhook if one was set, and
/// awaits the channel task.
async fn shutdown_signal(
    telegram: Arc<TelegramChannel>,
    poll_handle: Option<JoinHandle<()>>,
    webhook_active: bool,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channel");

    telegram.stop();
    if webhook_active {
        if let Err(e) = telegram.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
    if let Some(handle) = poll_handle {
        let _ = handle.await;
    }
    log::info!("channel tasks finished");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<DaemonState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.daemon.port,
        "rules": state.rule_count,
    }))
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies the
/// optional secret, decodes, and queues the event.
async fn telegram_webhook(
    State(state): State<DaemonState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(event) = state.telegram.decode_update(update) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(event).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}
