//! Telegram channel: long-poll getUpdates and sendMessage via Bot API.
//!
//! Updates are decoded into [`InboundEvent`]s here. Known-benign transport
//! noise — updates without a message, unknown chat types, messages with no
//! sender — is classified and dropped at this boundary with a debug log;
//! the dispatch engine never sees it.

use crate::channels::inbound::{ConversationKind, InboundEvent};
use crate::channels::send::{SendError, SendPort};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
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
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetMeResponse {
    ok: bool,
    #[serde(default)]
    result: Option<TelegramUser>,
}

/// Error body for failed Bot API calls; 429 responses carry retry_after.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram channel connector: long-polls for updates and sends replies via
/// sendMessage. Also the engine's [`SendPort`].
pub struct TelegramChannel {
    token: Option<String>,
    running: AtomicBool,
    /// Our own user id from getMe; 0 until known. Used for is_from_self.
    self_id: AtomicI64,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            running: AtomicBool::new(false),
            self_id: AtomicI64::new(0),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn token(&self) -> Result<&str, String> {
        self.token
            .as_deref()
            .ok_or_else(|| "telegram bot token not configured".to_string())
    }

    /// Start the getUpdates long-poll loop and forward decoded events.
    /// Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Fetch our own user id so inbound decoding can flag self-authored
    /// messages. Safe to call more than once.
    pub async fn resolve_self_id(&self) -> Result<i64, String> {
        let known = self.self_id.load(Ordering::SeqCst);
        if known != 0 {
            return Ok(known);
        }
        let url = format!("{}/bot{}/getMe", TELEGRAM_API_BASE, self.token()?);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("getMe failed: {} {}", status, body));
        }
        let data: GetMeResponse = res.json().await.map_err(|e| e.to_string())?;
        let me = data
            .result
            .filter(|_| data.ok)
            .ok_or_else(|| "getMe returned ok: false".to_string())?;
        self.self_id.store(me.id, Ordering::SeqCst);
        Ok(me.id)
    }

    /// Decode one update into an inbound event. Returns None for update
    /// shapes the responder does not handle; those are the benign cases
    /// that are filtered here instead of surfacing as errors downstream.
    pub fn decode_update(&self, update: TelegramUpdate) -> Option<InboundEvent> {
        let msg = match update.message {
            Some(m) => m,
            None => {
                log::debug!("skipping update {}: no message payload", update.update_id);
                return None;
            }
        };
        let text = match msg.text {
            Some(t) => t,
            None => {
                log::debug!("skipping update {}: no text", update.update_id);
                return None;
            }
        };
        let kind = match msg.chat.kind.as_str() {
            "group" | "supergroup" => ConversationKind::Group,
            "private" => ConversationKind::Private,
            "channel" => ConversationKind::Channel,
            other => {
                log::debug!(
                    "skipping update {}: unknown chat type {:?}",
                    update.update_id,
                    other
                );
                return None;
            }
        };
        let from = match msg.from {
            Some(f) => f,
            None => {
                log::debug!("skipping update {}: no sender", update.update_id);
                return None;
            }
        };
        let self_id = self.self_id.load(Ordering::SeqCst);
        Some(InboundEvent {
            conversation_id: msg.chat.id.to_string(),
            is_from_self: self_id != 0 && from.id == self_id,
            sender_first_name: from.first_name,
            sender_username: from.username,
            conversation_title: msg.chat.title,
            text,
            message_id: msg.message_id,
            kind,
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), String> {
        let url = format!(
            "{}/bot{}/getUpdates?timeout={}",
            TELEGRAM_API_BASE,
            self.token()?,
            LONG_POLL_TIMEOUT
        );
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("getUpdates failed: {} {}", status, body));
        }
        let data: GetUpdatesResponse = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err("getUpdates returned ok: false".to_string());
        }
        let next_offset = data
            .result
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1);
        Ok((data.result, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs
    /// updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), String> {
        let api_url = format!("{}/bot{}/setWebhook", TELEGRAM_API_BASE, self.token()?);
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let res = self
            .client
            .post(&api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("setWebhook failed: {} {}", status, body));
        }
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), String> {
        let url = format!("{}/bot{}/deleteWebhook", TELEGRAM_API_BASE, self.token()?);
        let res = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("deleteWebhook failed: {} {}", status, body));
        }
        Ok(())
    }
}

/// Map a failed sendMessage response to the engine's error taxonomy.
fn classify_send_failure(status: reqwest::StatusCode, body: &str) -> SendError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let description = parsed
        .as_ref()
        .and_then(|b| b.description.clone())
        .unwrap_or_else(|| body.to_string());
    match status.as_u16() {
        429 => {
            let retry_after = parsed
                .and_then(|b| b.parameters)
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            SendError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            }
        }
        403 => SendError::PermissionDenied(description),
        _ => SendError::Other(format!("{} {}", status, description)),
    }
}

#[async_trait]
impl SendPort for TelegramChannel {
    async fn send(
        &self,
        conversation_id: &str,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<(), SendError> {
        let token = self.token().map_err(SendError::Other)?;
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, token);
        let mut body = serde_json::json!({ "chat_id": conversation_id, "text": text });
        if let Some(id) = reply_to_message_id {
            body["reply_to_message_id"] = serde_json::Value::from(id);
        }
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Other(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(classify_send_failure(status, &body));
        }
        Ok(())
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundEvent>) {
    if let Err(e) = channel.resolve_self_id().await {
        log::warn!("telegram getMe failed, own messages may not be filtered: {}", e);
    }
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next;
                for u in updates {
                    if let Some(event) = channel.decode_update(u) {
                        if inbound_tx.send(event).await.is_err() {
                            log::debug!("telegram: inbound channel closed, stopping loop");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> TelegramChannel {
        TelegramChannel::new(Some("token".to_string()))
    }

    fn update(json: &str) -> TelegramUpdate {
        serde_json::from_str(json).expect("parse update")
    }

    #[test]
    fn decodes_supergroup_message() {
        let ch = channel();
        let event = ch
            .decode_update(update(
                r#"{
                    "update_id": 1,
                    "message": {
                        "message_id": 42,
                        "chat": {"id": -100123, "type": "supergroup", "title": "Grup A"},
                        "from": {"id": 7, "first_name": "Ari", "username": "arioke"},
                        "text": "ada ubot disini"
                    }
                }"#,
            ))
            .expect("event");
        assert_eq!(event.conversation_id, "-100123");
        assert_eq!(event.kind, ConversationKind::Group);
        assert_eq!(event.conversation_title.as_deref(), Some("Grup A"));
        assert_eq!(event.sender_username.as_deref(), Some("arioke"));
        assert_eq!(event.message_id, 42);
        assert!(!event.is_from_self);
    }

    #[test]
    fn flags_own_messages_once_self_id_is_known() {
        let ch = channel();
        ch.self_id.store(7, Ordering::SeqCst);
        let event = ch
            .decode_update(update(
                r#"{
                    "update_id": 2,
                    "message": {
                        "message_id": 1,
                        "chat": {"id": -100123, "type": "group"},
                        "from": {"id": 7, "first_name": "Me"},
                        "text": ".status"
                    }
                }"#,
            ))
            .expect("event");
        assert!(event.is_from_self);
    }

    #[test]
    fn benign_update_shapes_are_dropped() {
        let ch = channel();
        // Edited-message updates carry no `message` field.
        assert!(ch.decode_update(update(r#"{"update_id": 3}"#)).is_none());
        // Sticker messages carry no text.
        assert!(ch
            .decode_update(update(
                r#"{
                    "update_id": 4,
                    "message": {
                        "message_id": 2,
                        "chat": {"id": -1, "type": "group"},
                        "from": {"id": 9, "first_name": "X"}
                    }
                }"#,
            ))
            .is_none());
        // Unknown chat types never reach the engine.
        assert!(ch
            .decode_update(update(
                r#"{
                    "update_id": 5,
                    "message": {
                        "message_id": 3,
                        "chat": {"id": -1, "type": "sender"},
                        "from": {"id": 9, "first_name": "X"},
                        "text": "hi"
                    }
                }"#,
            ))
            .is_none());
    }

    #[test]
    fn rate_limit_response_maps_to_retry_after() {
        let err = classify_send_failure(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"ok": false, "description": "Too Many Requests", "parameters": {"retry_after": 17}}"#,
        );
        match err {
            SendError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(17));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn forbidden_response_maps_to_permission_denied() {
        let err = classify_send_failure(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"ok": false, "description": "Forbidden: bot was kicked"}"#,
        );
        assert!(matches!(err, SendError::PermissionDenied(d) if d.contains("kicked")));
    }

    #[test]
    fn other_failures_keep_status_and_description() {
        let err = classify_send_failure(reqwest::StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(err, SendError::Other(d) if d.contains("400")));
    }
}
