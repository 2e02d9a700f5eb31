//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.flowlink/config.json`) and environment.
//! Secrets and endpoints can be supplied through env vars so the file can be committed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings (callback route and health probe).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Remote workflow engine: webhook, management API and provisioning.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// In-flight session lifetime.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Chat behaviour (trigger word, channel restriction, trace channel).
    #[serde(default)]
    pub chat: ChatConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Gateway bind, port, and callback secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8889).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Shared secret expected in `X-Callback-Secret`. Overridden by FLOWLINK_CALLBACK_SECRET env.
    #[serde(default)]
    pub callback_secret: Option<String>,
}

fn default_gateway_port() -> u16 {
    8889
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            callback_secret: None,
        }
    }
}

/// Remote workflow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// Production webhook URL (e.g. `http://n8n:5678/webhook/bob-prompt`). Overridden by N8N_WEBHOOK_URL env.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// API key sent on webhook POSTs and management calls. Overridden by N8N_API_KEY env.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Header carrying the API key. n8n's public API expects `X-N8N-API-KEY`.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Management API base. When unset it is derived from the webhook URL: everything before `/webhook/` plus `/api/v1`.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Canonical workflow name on the remote engine.
    #[serde(default = "default_workflow_name")]
    pub name: String,

    /// Path of the webhook trigger node; definitions using the same path are conflicts.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,

    /// Workflow template file. Relative paths resolve against the config file's parent; default `workflow.json` there, falling back to the bundled template when missing.
    #[serde(default)]
    pub template_path: Option<PathBuf>,

    /// Per-attempt webhook timeout in seconds (default 60).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Which 404 recoveries the dispatcher attempts.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reconcile the remote workflow once when the gateway starts (default true).
    #[serde(default = "default_true")]
    pub provision_on_start: bool,
}

fn default_api_key_header() -> String {
    "X-API-KEY".to_string()
}

fn default_workflow_name() -> String {
    "Bob Chat Workflow".to_string()
}

fn default_webhook_path() -> String {
    "bob-prompt".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            api_key: None,
            api_key_header: default_api_key_header(),
            api_base_url: None,
            name: default_workflow_name(),
            webhook_path: default_webhook_path(),
            template_path: None,
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            provision_on_start: true,
        }
    }
}

impl WorkflowConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// 404 recovery switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// On a first-attempt 404, re-run provisioning and retry the primary URL.
    #[serde(default = "default_true")]
    pub resync_on_not_found: bool,
    /// On a second-attempt 404, resolve a fallback URL from the workflow id and retry there.
    #[serde(default = "default_true")]
    pub fallback_on_not_found: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            resync_on_not_found: true,
            fallback_on_not_found: true,
        }
    }
}

/// Session lifetime and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Maximum age of an unresolved session (default 900 = 15 minutes).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Sweep period (default 300 = 5 minutes).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Chat-side behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Messages containing this word (case-insensitive) are dispatched (default "bob").
    #[serde(default = "default_trigger_word")]
    pub trigger_word: String,
    /// When set, only messages from this channel/conversation are dispatched.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// When set, diagnostic traces are posted to this channel.
    #[serde(default)]
    pub trace_channel_id: Option<String>,
    /// Transport message-length limit used when relaying responses (default 2000).
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_trigger_word() -> String {
    "bob".to_string()
}

fn default_max_message_len() -> usize {
    2000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            trigger_word: default_trigger_word(),
            channel_id: None,
            trace_channel_id: None,
            max_message_len: default_max_message_len(),
        }
    }
}

/// Per-channel config (e.g. Telegram bot token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Bot API base (default https://api.telegram.org); mostly for tests and self-hosted Bot API servers.
    pub api_base: Option<String>,
}

/// Non-empty trimmed env var, if set.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the webhook URL: env N8N_WEBHOOK_URL overrides config.
pub fn resolve_webhook_url(config: &Config) -> Option<String> {
    env_override("N8N_WEBHOOK_URL").or_else(|| non_empty(config.workflow.webhook_url.as_ref()))
}

/// Resolve the workflow API key: env N8N_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_override("N8N_API_KEY").or_else(|| non_empty(config.workflow.api_key.as_ref()))
}

/// Resolve the callback secret: env FLOWLINK_CALLBACK_SECRET overrides config.
pub fn resolve_callback_secret(config: &Config) -> Option<String> {
    env_override("FLOWLINK_CALLBACK_SECRET")
        .or_else(|| non_empty(config.gateway.callback_secret.as_ref()))
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_override("TELEGRAM_BOT_TOKEN")
        .or_else(|| non_empty(config.channels.telegram.bot_token.as_ref()))
}

/// Management API base: explicit `apiBaseUrl`, else derived from the webhook URL.
pub fn resolve_api_base_url(workflow: &WorkflowConfig, webhook_url: Option<&str>) -> Option<String> {
    if let Some(base) = non_empty(workflow.api_base_url.as_ref()) {
        return Some(base.trim_end_matches('/').to_string());
    }
    webhook_url.map(|url| format!("{}/api/v1", engine_base_url(url)))
}

/// Engine origin for a webhook URL: `http://n8n:5678/webhook/bob-prompt` -> `http://n8n:5678`.
pub fn engine_base_url(webhook_url: &str) -> String {
    webhook_url
        .split("/webhook/")
        .next()
        .unwrap_or(webhook_url)
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the workflow template path (relative to the config file's parent); default `workflow.json` there.
pub fn resolve_template_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.workflow.template_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("workflow.json"),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FLOWLINK_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".flowlink").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default (FLOWLINK_CONFIG_PATH or ~/.flowlink/config.json).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
