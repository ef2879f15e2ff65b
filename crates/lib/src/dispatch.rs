//! Dispatch engine: decides per inbound event whether to reply, and sends.
//!
//! Each event walks a fixed gate sequence — own-message, conversation kind,
//! enable state, empty text, rule match, cooldown, delay, render — and either
//! ends in one send request or a suppressed no-op. Exactly one rule fires per
//! event. Suppression is expected steady-state behavior, never an error.

use crate::channels::{InboundEvent, SendError, SendPort};
use crate::cooldown::CooldownTracker;
use crate::respond;
use crate::rules::RuleSet;
use crate::state::{ConversationStateStore, StateError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Engine knobs, resolved from config at construction.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Minimum elapsed time between two fires of the same trigger in the
    /// same conversation.
    pub cooldown_window: Duration,
    /// Artificial human-like delay range before sending. `[0, 0]` disables.
    pub delay_min: Duration,
    pub delay_max: Duration,
    /// Reply to the triggering message instead of posting bare.
    pub reply_to_trigger: bool,
    /// Drop events authored by this account.
    pub ignore_own_messages: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cooldown_window: Duration::from_secs(6),
            delay_min: Duration::from_millis(200),
            delay_max: Duration::from_millis(800),
            reply_to_trigger: true,
            ignore_own_messages: true,
        }
    }
}

/// Why an event ended without a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    OwnMessage,
    NotGroup,
    Disabled,
    EmptyText,
    NoMatch,
    Cooldown,
    EmptyRender,
}

/// Terminal outcome for one event. `Sent` means the send was requested;
/// transport failures are recovered or dropped locally and stay silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Suppressed(SuppressReason),
}

/// Transient per-event failures. The caller decides retry-or-drop for the
/// single event; later events are unaffected.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("conversation state unavailable: {0}")]
    State(#[from] StateError),
}

pub struct DispatchEngine {
    rules: Arc<RuleSet>,
    cooldown: Arc<CooldownTracker>,
    state: Arc<ConversationStateStore>,
    sender: Arc<dyn SendPort>,
    settings: EngineSettings,
}

impl DispatchEngine {
    pub fn new(
        rules: Arc<RuleSet>,
        cooldown: Arc<CooldownTracker>,
        state: Arc<ConversationStateStore>,
        sender: Arc<dyn SendPort>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            rules,
            cooldown,
            state,
            sender,
            settings,
        }
    }

    /// Handle one inbound event to its terminal outcome.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Outcome, DispatchError> {
        if self.settings.ignore_own_messages && event.is_from_self {
            return Ok(Outcome::Suppressed(SuppressReason::OwnMessage));
        }
        if !event.is_group() {
            return Ok(Outcome::Suppressed(SuppressReason::NotGroup));
        }
        if !self.state.is_enabled(&event.conversation_id).await? {
            return Ok(Outcome::Suppressed(SuppressReason::Disabled));
        }
        if event.text.trim().is_empty() {
            return Ok(Outcome::Suppressed(SuppressReason::EmptyText));
        }
        let Some((rule, trigger)) = self.rules.first_match(&event.text) else {
            return Ok(Outcome::Suppressed(SuppressReason::NoMatch));
        };
        if !self
            .cooldown
            .try_fire(
                &event.conversation_id,
                &trigger,
                Instant::now(),
                self.settings.cooldown_window,
            )
            .await
        {
            log::debug!(
                "cooldown active: chat={} trigger={}",
                event.conversation_id,
                trigger
            );
            return Ok(Outcome::Suppressed(SuppressReason::Cooldown));
        }

        // The cooldown entry is already committed, so this delay holds no
        // lock and a concurrent duplicate is rejected regardless of how
        // long it runs.
        let delay = respond::jitter(self.settings.delay_min, self.settings.delay_max);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let text = respond::render(rule, event);
        if text.trim().is_empty() {
            return Ok(Outcome::Suppressed(SuppressReason::EmptyRender));
        }

        let reply_to = self.settings.reply_to_trigger.then_some(event.message_id);
        log::debug!(
            "match: chat={} trigger={} -> send",
            event.conversation_id,
            trigger
        );
        self.deliver(&event.conversation_id, &text, reply_to).await;
        Ok(Outcome::Sent)
    }

    /// Send with the local recovery policy: on rate limiting wait out
    /// `retry_after` and retry exactly once, then give up silently; other
    /// failures are logged and dropped. Nothing propagates to the caller.
    async fn deliver(&self, conversation_id: &str, text: &str, reply_to: Option<i64>) {
        match self.sender.send(conversation_id, text, reply_to).await {
            Ok(()) => {}
            Err(SendError::RateLimited { retry_after }) => {
                log::warn!(
                    "send rate limited: chat={} retry in {:?}",
                    conversation_id,
                    retry_after
                );
                tokio::time::sleep(retry_after).await;
                if let Err(e) = self.sender.send(conversation_id, text, reply_to).await {
                    log::debug!("send retry failed: chat={} err={}", conversation_id, e);
                }
            }
            Err(e) => {
                log::warn!("send failed: chat={} err={}", conversation_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ConversationKind;
    use crate::rules::{RawRule, RuleSet};
    use crate::state::{ConversationId, StatePersistence};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryPort {
        records: Mutex<HashSet<ConversationId>>,
        fail_load: bool,
    }

    #[async_trait]
    impl StatePersistence for MemoryPort {
        async fn load_all_enabled(&self) -> Result<HashSet<ConversationId>, StateError> {
            if self.fail_load {
                return Err(StateError::Load("storage offline".to_string()));
            }
            Ok(self.records.lock().await.clone())
        }

        async fn upsert(
            &self,
            conversation_id: &str,
            enabled: bool,
            _updated_at: DateTime<Utc>,
        ) -> Result<(), StateError> {
            let mut records = self.records.lock().await;
            if enabled {
                records.insert(conversation_id.to_string());
            } else {
                records.remove(conversation_id);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSender {
        sends: Mutex<Vec<(String, String, Option<i64>)>>,
        scripted_failures: Mutex<VecDeque<SendError>>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SendPort for MockSender {
        async fn send(
            &self,
            conversation_id: &str,
            text: &str,
            reply_to_message_id: Option<i64>,
        ) -> Result<(), SendError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.scripted_failures.lock().await.pop_front() {
                return Err(err);
            }
            self.sends.lock().await.push((
                conversation_id.to_string(),
                text.to_string(),
                reply_to_message_id,
            ));
            Ok(())
        }
    }

    fn rules() -> Arc<RuleSet> {
        Arc::new(
            RuleSet::from_raw(vec![RawRule::Pair("ubot".into(), "bot gacor".into())])
                .expect("valid rules"),
        )
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            ..EngineSettings::default()
        }
    }

    async fn engine_with(
        sender: Arc<MockSender>,
        port: Arc<MemoryPort>,
        enabled: &[&str],
        settings: EngineSettings,
    ) -> DispatchEngine {
        let state = Arc::new(ConversationStateStore::new(port));
        for id in enabled {
            state.set_enabled(id, true).await.expect("enable");
        }
        DispatchEngine::new(
            rules(),
            Arc::new(CooldownTracker::new()),
            state,
            sender,
            settings,
        )
    }

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            conversation_id: "-100123".to_string(),
            sender_first_name: "Ari".to_string(),
            sender_username: Some("arioke".to_string()),
            conversation_title: Some("Grup A".to_string()),
            text: text.to_string(),
            message_id: 42,
            is_from_self: false,
            kind: ConversationKind::Group,
        }
    }

    #[tokio::test]
    async fn matching_event_sends_once_then_cooldown_suppresses() {
        let sender = Arc::new(MockSender::default());
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &["-100123"],
            settings(),
        )
        .await;

        let first = engine.handle(&event("ada ubot disini")).await.expect("handle");
        assert_eq!(first, Outcome::Sent);
        // A second identical message moments later is inside the 6s window.
        let second = engine.handle(&event("ada ubot disini")).await.expect("handle");
        assert_eq!(second, Outcome::Suppressed(SuppressReason::Cooldown));

        let sends = sender.sends.lock().await;
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, "-100123");
        assert_eq!(sends[0].1, "bot gacor");
        assert_eq!(sends[0].2, Some(42));
    }

    #[tokio::test]
    async fn disabled_conversation_short_circuits_before_rule_scan() {
        let sender = Arc::new(MockSender::default());
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &[],
            settings(),
        )
        .await;

        let out = engine.handle(&event("ada ubot disini")).await.expect("handle");
        assert_eq!(out, Outcome::Suppressed(SuppressReason::Disabled));
        assert!(sender.sends.lock().await.is_empty());
    }

    #[tokio::test]
    async fn own_and_non_group_events_are_suppressed() {
        let sender = Arc::new(MockSender::default());
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &["-100123"],
            settings(),
        )
        .await;

        let mut own = event("ada ubot disini");
        own.is_from_self = true;
        assert_eq!(
            engine.handle(&own).await.expect("handle"),
            Outcome::Suppressed(SuppressReason::OwnMessage)
        );

        let mut private = event("ada ubot disini");
        private.kind = ConversationKind::Private;
        assert_eq!(
            engine.handle(&private).await.expect("handle"),
            Outcome::Suppressed(SuppressReason::NotGroup)
        );
        assert!(sender.sends.lock().await.is_empty());
    }

    #[tokio::test]
    async fn empty_text_and_no_match_are_suppressed() {
        let sender = Arc::new(MockSender::default());
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &["-100123"],
            settings(),
        )
        .await;

        assert_eq!(
            engine.handle(&event("   ")).await.expect("handle"),
            Outcome::Suppressed(SuppressReason::EmptyText)
        );
        assert_eq!(
            engine.handle(&event("selamat pagi")).await.expect("handle"),
            Outcome::Suppressed(SuppressReason::NoMatch)
        );
    }

    #[tokio::test]
    async fn whitespace_render_suppresses_the_send() {
        let sender = Arc::new(MockSender::default());
        let rules = Arc::new(
            RuleSet::from_raw(vec![RawRule::Pair("ubot".into(), "{username}".into())])
                .expect("valid rules"),
        );
        let state = Arc::new(ConversationStateStore::new(Arc::new(MemoryPort::default())));
        state.set_enabled("-100123", true).await.expect("enable");
        let engine = DispatchEngine::new(
            rules,
            Arc::new(CooldownTracker::new()),
            state,
            sender.clone(),
            settings(),
        );

        let mut ev = event("ada ubot disini");
        ev.sender_username = None;
        assert_eq!(
            engine.handle(&ev).await.expect("handle"),
            Outcome::Suppressed(SuppressReason::EmptyRender)
        );
        assert!(sender.sends.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_send_retries_exactly_once() {
        let sender = Arc::new(MockSender::default());
        sender
            .scripted_failures
            .lock()
            .await
            .push_back(SendError::RateLimited {
                retry_after: Duration::from_millis(5),
            });
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &["-100123"],
            settings(),
        )
        .await;

        let out = engine.handle(&event("ada ubot disini")).await.expect("handle");
        assert_eq!(out, Outcome::Sent);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sender.sends.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn second_rate_limit_gives_up_silently() {
        let sender = Arc::new(MockSender::default());
        {
            let mut failures = sender.scripted_failures.lock().await;
            failures.push_back(SendError::RateLimited {
                retry_after: Duration::from_millis(5),
            });
            failures.push_back(SendError::RateLimited {
                retry_after: Duration::from_millis(5),
            });
        }
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &["-100123"],
            settings(),
        )
        .await;

        let out = engine.handle(&event("ada ubot disini")).await.expect("handle");
        assert_eq!(out, Outcome::Sent);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
        assert!(sender.sends.lock().await.is_empty());
    }

    #[tokio::test]
    async fn permission_denied_drops_without_retry() {
        let sender = Arc::new(MockSender::default());
        sender
            .scripted_failures
            .lock()
            .await
            .push_back(SendError::PermissionDenied("kicked".to_string()));
        let engine = engine_with(
            sender.clone(),
            Arc::new(MemoryPort::default()),
            &["-100123"],
            settings(),
        )
        .await;

        let out = engine.handle(&event("ada ubot disini")).await.expect("handle");
        assert_eq!(out, Outcome::Sent);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_transient_error() {
        let sender = Arc::new(MockSender::default());
        let port = Arc::new(MemoryPort {
            fail_load: true,
            ..MemoryPort::default()
        });
        let state = Arc::new(ConversationStateStore::new(port));
        let engine = DispatchEngine::new(
            rules(),
            Arc::new(CooldownTracker::new()),
            state,
            sender.clone(),
            settings(),
        );

        let err = engine.handle(&event("ada ubot disini")).await.unwrap_err();
        assert!(matches!(err, DispatchError::State(StateError::Load(_))));
        assert!(sender.sends.lock().await.is_empty());
    }
}
