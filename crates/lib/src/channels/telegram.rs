//! Telegram channel: long-poll getUpdates for inbound messages; placeholder replies, edits and
//! typing via the Bot API.

use crate::channels::inbound::InboundMessage;
use crate::conversation::{ConversationError, ConversationLayer};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

/// Bot API envelope: `{ ok, result?, description? }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramMessage {
    /// Inbound message for the dispatch service; `None` for non-text updates.
    /// `bot` is the getMe identity, used to spot mentions and replies to the bot.
    pub fn to_inbound(&self, bot: Option<&TelegramUser>) -> Option<InboundMessage> {
        let text = self.text.as_ref()?;
        let (user_id, user_name, user_tag) = match self.from {
            Some(ref u) => {
                let tag = u
                    .username
                    .as_ref()
                    .map(|n| format!("@{}", n))
                    .unwrap_or_else(|| u.id.to_string());
                let name = if u.first_name.is_empty() {
                    tag.clone()
                } else {
                    u.first_name.clone()
                };
                (u.id.to_string(), name, tag)
            }
            None => ("unknown".into(), "unknown".into(), "unknown".into()),
        };
        Some(InboundMessage {
            channel_id: self.chat.id.to_string(),
            message_id: self.message_id.to_string(),
            user_id,
            user_name,
            user_tag,
            text: text.clone(),
            addressed_to_bot: bot.map_or(false, |b| self.mentions(b, text) || self.replies_to(b)),
        })
    }

    fn mentions(&self, bot: &TelegramUser, text: &str) -> bool {
        match bot.username {
            Some(ref name) => text
                .to_lowercase()
                .contains(&format!("@{}", name.to_lowercase())),
            None => false,
        }
    }

    fn replies_to(&self, bot: &TelegramUser) -> bool {
        self.reply_to_message
            .as_ref()
            .and_then(|m| m.from.as_ref())
            .map_or(false, |u| u.id == bot.id)
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Telegram connector: conversation layer plus a stoppable getUpdates loop.
pub struct TelegramChannel {
    token: String,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the getUpdates long-poll loop and forward text messages. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundMessage>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST a Bot API method and unwrap its envelope.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ConversationError> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConversationError::Transport(e.to_string()))?;
        let status = res.status();
        let envelope: ApiResponse<T> = res
            .json()
            .await
            .map_err(|e| ConversationError::Transport(format!("{} {}: {}", method, status, e)))?;
        if !envelope.ok {
            let description = envelope.description.unwrap_or_default();
            if description.contains("message to edit not found") {
                let id = body.get("message_id").map(|v| v.to_string()).unwrap_or_default();
                return Err(ConversationError::MessageNotFound(id));
            }
            return Err(ConversationError::Transport(format!(
                "{} failed: {} {}",
                method, status, description
            )));
        }
        envelope
            .result
            .ok_or_else(|| ConversationError::Transport(format!("{} returned no result", method)))
    }

    /// The bot's own user, for mention and reply detection.
    async fn get_me(&self) -> Result<TelegramUser, ConversationError> {
        self.call("getMe", json!({})).await
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(&self, offset: Option<i64>) -> Result<(Vec<TelegramUpdate>, Option<i64>), ConversationError> {
        let mut body = json!({ "timeout": LONG_POLL_TIMEOUT, "allowed_updates": ["message"] });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", body).await?;
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }
}

/// Telegram ids are integers; anything else is passed through as a string.
fn id_value(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(id))
}

#[async_trait]
impl ConversationLayer for TelegramChannel {
    async fn show_typing(&self, channel_id: &str) -> Result<(), ConversationError> {
        let _: bool = self
            .call(
                "sendChatAction",
                json!({ "chat_id": id_value(channel_id), "action": "typing" }),
            )
            .await?;
        Ok(())
    }

    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, ConversationError> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": id_value(channel_id),
                    "text": text,
                    "reply_to_message_id": id_value(message_id),
                }),
            )
            .await?;
        Ok(sent.message_id.to_string())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ConversationError> {
        // Result is the edited message, or `true` for inline messages.
        let _: Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": id_value(channel_id),
                    "message_id": id_value(message_id),
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, ConversationError> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                json!({ "chat_id": id_value(channel_id), "text": text }),
            )
            .await?;
        Ok(sent.message_id.to_string())
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let bot = match channel.get_me().await {
        Ok(me) => {
            log::info!(
                "telegram channel: connected as {}",
                me.username.as_deref().unwrap_or(&me.first_name)
            );
            Some(me)
        }
        Err(e) => {
            log::warn!("telegram getMe failed, only the trigger word will start a dispatch: {}", e);
            None
        }
    };
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                if next.is_some() {
                    offset = next;
                }
                for inbound in updates
                    .iter()
                    .filter_map(|u| u.message.as_ref())
                    .filter_map(|m| m.to_inbound(bot.as_ref()))
                {
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}
