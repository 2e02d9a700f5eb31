//! Gateway HTTP server: health probe and the workflow callback route.

use crate::callback::CallbackPayload;
use crate::channels::{InboundMessage, TelegramChannel};
use crate::config::{self, Config};
use crate::conversation::{ConversationLayer, LogConversation};
use crate::service::DispatchService;
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
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Header carrying the shared callback secret.
pub const CALLBACK_SECRET_HEADER: &str = "X-Callback-Secret";

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub service: Arc<DispatchService>,
    /// When Some, `POST /callback` must carry this value in `X-Callback-Secret`.
    pub callback_secret: Option<String>,
}

impl GatewayState {
    pub fn new(config: Config, service: Arc<DispatchService>) -> Self {
        let callback_secret = config::resolve_callback_secret(&config);
        Self {
            config: Arc::new(config),
            service,
            callback_secret,
        }
    }
}

/// Routes: `GET /` health, `POST /callback` (and `/ai/callback`, the path older workflow exports use).
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/callback", post(callback_http))
        .route("/ai/callback", post(callback_http))
        .with_state(state)
}

pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let telegram = config::resolve_telegram_token(&config).map(|token| {
        Arc::new(TelegramChannel::new(
            token,
            config.channels.telegram.api_base.clone(),
        ))
    });
    let conversation: Arc<dyn ConversationLayer> = match telegram {
        Some(ref t) => t.clone(),
        None => {
            log::info!("no chat channel configured; conversation updates are only logged");
            Arc::new(LogConversation::new())
        }
    };

    let service = Arc::new(DispatchService::from_config(
        &config,
        &config_path,
        conversation,
    ));
    service.start();

    let mut channel_tasks: Vec<JoinHandle<()>> = Vec::new();
    if let Some(ref telegram) = telegram {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
        channel_tasks.push(telegram.clone().start_inbound(inbound_tx));
        let svc = service.clone();
        // Each message is dispatched on its own task so slow workflows do not block the poll loop.
        channel_tasks.push(tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.handle_inbound(msg).await;
                });
            }
        }));
        log::info!("telegram channel registered and getUpdates loop started");
    }

    let bind = config.gateway.bind.trim().to_string();
    let port = config.gateway.port;
    let state = GatewayState::new(config, service.clone());
    if state.callback_secret.is_none() {
        log::warn!("callback: no callback secret configured; /callback accepts any caller");
    }
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service, telegram, channel_tasks))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops the session sweep and the Telegram loop, then awaits the poll task.
async fn shutdown_signal(
    service: Arc<DispatchService>,
    telegram: Option<Arc<TelegramChannel>>,
    channel_tasks: Vec<JoinHandle<()>>,
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
    log::info!("shutdown signal received, stopping channels and draining connections");

    service.stop();
    if let Some(t) = telegram {
        t.stop();
    }
    let pending = service.sessions().len().await;
    if pending > 0 {
        log::info!("sessions: {} unresolved session(s) dropped on shutdown", pending);
    }

    // The poll loop ends after its current long poll; the forwarding task ends once the loop drops its sender.
    for h in channel_tasks {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "sessions": state.service.sessions().len().await,
        "dispatch": if state.service.dispatch_enabled() { "enabled" } else { "disabled" },
    }))
}

/// POST /callback: verify the optional secret, resolve the session. Answers `received` whether
/// or not the session was still live.
async fn callback_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Some(ref expected) = state.callback_secret {
        let provided = headers
            .get(CALLBACK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            log::warn!("callback: rejected request with missing or wrong secret");
            return (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" })));
        }
    }
    let payload: CallbackPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("callback: malformed body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid callback payload" })),
            );
        }
    };
    match payload.session_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(session_id) => {
            log::info!("callback: received for session {}", session_id);
            state.service.handle_callback(session_id, &payload).await;
        }
        None => log::warn!("callback: received without a sessionId"),
    }
    (StatusCode::OK, Json(json!({ "status": "received" })))
}
