//! Administrative command surface.
//!
//! Enable/disable/status/list-rules are plain operations over the stores;
//! the dot-command parser (`.on`, `/status`, ...) maps chat messages from
//! allowlisted admins onto them. Command parsing and authorization live
//! here, outside the dispatch engine.

use crate::channels::InboundEvent;
use crate::rules::{MatchMode, Rule, RuleSet};
use crate::state::ConversationStateStore;
use std::sync::Arc;
use std::time::Duration;

/// Recognized admin commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Ping,
    Id,
    On,
    Off,
    Status,
    Menu,
}

/// Parse a `.cmd` / `/cmd` message. The command word must end at
/// whitespace, so `.online` is not `.on`.
pub fn parse_command(text: &str) -> Option<AdminCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix(&['.', '/'][..])?;
    let word = rest.split_whitespace().next()?;
    match word {
        "ping" => Some(AdminCommand::Ping),
        "id" => Some(AdminCommand::Id),
        "on" => Some(AdminCommand::On),
        "off" => Some(AdminCommand::Off),
        "status" => Some(AdminCommand::Status),
        "menu" => Some(AdminCommand::Menu),
        _ => None,
    }
}

/// Executes admin commands against the state store and rule table.
pub struct AdminSurface {
    state: Arc<ConversationStateStore>,
    rules: Arc<RuleSet>,
    cooldown_window: Duration,
    /// Lowercased handles allowed to drive commands.
    admins: Vec<String>,
}

impl AdminSurface {
    pub fn new(
        state: Arc<ConversationStateStore>,
        rules: Arc<RuleSet>,
        cooldown_window: Duration,
        admins: &[String],
    ) -> Self {
        Self {
            state,
            rules,
            cooldown_window,
            admins: admins.iter().map(|a| a.to_lowercase()).collect(),
        }
    }

    /// Whether this sender handle may drive admin commands.
    pub fn is_admin(&self, username: Option<&str>) -> bool {
        match username {
            Some(u) => self.admins.iter().any(|a| a == &u.to_lowercase()),
            None => false,
        }
    }

    /// One line per configured rule, for the menu and the CLI.
    pub fn list_rules(&self) -> Vec<String> {
        self.rules.iter().map(format_rule).collect()
    }

    /// Run a command in the context of the conversation it arrived in and
    /// render the reply text. A failed toggle reports the failure instead
    /// of confirming, so the state the admin sees matches persisted truth.
    pub async fn execute(&self, command: AdminCommand, event: &InboundEvent) -> String {
        let chat_id = event.conversation_id.as_str();
        match command {
            AdminCommand::Ping => "pong".to_string(),
            AdminCommand::Id => format!("chat_id: `{}`", chat_id),
            AdminCommand::On => match self.state.set_enabled(chat_id, true).await {
                Ok(()) => {
                    log::info!("admin: ON chat={}", chat_id);
                    "ChatRep ON di grup ini.".to_string()
                }
                Err(e) => {
                    log::warn!("admin: enable failed chat={} err={}", chat_id, e);
                    format!("gagal menyimpan status: {}", e)
                }
            },
            AdminCommand::Off => match self.state.set_enabled(chat_id, false).await {
                Ok(()) => {
                    log::info!("admin: OFF chat={}", chat_id);
                    "ChatRep OFF di grup ini.".to_string()
                }
                Err(e) => {
                    log::warn!("admin: disable failed chat={} err={}", chat_id, e);
                    format!("gagal menyimpan status: {}", e)
                }
            },
            AdminCommand::Status => match self.state.is_enabled(chat_id).await {
                Ok(enabled) => format!("Status ChatRep grup ini: {}", on_off(enabled)),
                Err(e) => format!("gagal membaca status: {}", e),
            },
            AdminCommand::Menu => {
                let status = match self.state.is_enabled(chat_id).await {
                    Ok(enabled) => on_off(enabled).to_string(),
                    Err(_) => "?".to_string(),
                };
                let rules = if self.rules.is_empty() {
                    "- (kosong)".to_string()
                } else {
                    self.list_rules().join("\n")
                };
                format!(
                    "CHATREP\n\n\
                     Status grup ini : {}\n\
                     Cooldown        : {}s\n\n\
                     Commands:\n\
                     • .ping\n• .id\n• .on\n• .off\n• .status\n• .menu\n\n\
                     Rules:\n{}",
                    status,
                    self.cooldown_window.as_secs(),
                    rules
                )
            }
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

/// One display line for a rule, shared by the menu and the CLI.
pub fn format_rule(rule: &Rule) -> String {
    let mode = match rule.mode {
        MatchMode::Contains => "contains",
        MatchMode::Exact => "exact",
    };
    format!("• [{}] {} -> {}", mode, rule.trigger, rule.responses.join(" / "))
}
