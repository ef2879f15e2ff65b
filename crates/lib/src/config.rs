//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatrep/config.json`) and
//! environment. Rule and state files live beside the config by default and
//! can be pointed elsewhere per section.

use crate::dispatch::EngineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Daemon HTTP settings (health endpoint, Telegram webhook).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Channel settings (Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Responder behavior: cooldown, human delay, reply mode.
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Rules file location.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Conversation-state storage location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Daemon bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Port for the HTTP surface (default 15152).
    #[serde(default = "default_daemon_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_daemon_bind")]
    pub bind: String,
}

fn default_daemon_port() -> u16 {
    15152
}

fn default_daemon_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            bind: default_daemon_bind(),
        }
    }
}

/// Per-channel config.
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
    /// When set, use webhook mode: Telegram POSTs updates to this URL.
    /// If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token).
    pub webhook_secret: Option<String>,
    /// Handles (without `@`) allowed to drive `.on`/`.off`/... commands.
    #[serde(default)]
    pub admin_usernames: Vec<String>,
}

/// Responder behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponderConfig {
    /// Minimum seconds between two fires of the same trigger in the same
    /// conversation (default 6).
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Human-like delay range before sending, in milliseconds. `[0, 0]`
    /// disables the delay (default [200, 800]).
    #[serde(default = "default_human_delay_ms")]
    pub human_delay_ms: [u64; 2],

    /// Reply to the triggering message instead of posting bare (default true).
    #[serde(default = "default_true")]
    pub reply_to_trigger: bool,

    /// Ignore messages authored by this account (default true).
    #[serde(default = "default_true")]
    pub ignore_own_messages: bool,
}

fn default_cooldown_seconds() -> u64 {
    6
}

fn default_human_delay_ms() -> [u64; 2] {
    [200, 800]
}

fn default_true() -> bool {
    true
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            human_delay_ms: default_human_delay_ms(),
            reply_to_trigger: true,
            ignore_own_messages: true,
        }
    }
}

impl ResponderConfig {
    /// Engine settings resolved from this section.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cooldown_window: Duration::from_secs(self.cooldown_seconds),
            delay_min: Duration::from_millis(self.human_delay_ms[0]),
            delay_max: Duration::from_millis(self.human_delay_ms[1]),
            reply_to_trigger: self.reply_to_trigger,
            ignore_own_messages: self.ignore_own_messages,
        }
    }
}

/// Rules file location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    /// Rules JSON file. Relative paths are resolved against the config
    /// file's parent. Default: `rules.json` beside the config file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Conversation-state storage location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// State JSON file. Relative paths are resolved against the config
    /// file's parent. Default: `state.json` beside the config file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATREP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatrep").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .channels
                .telegram
                .bot_token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_file(
    configured: Option<&PathBuf>,
    config_path: &Path,
    default_name: &str,
) -> PathBuf {
    match configured {
        Some(f) if !f.as_os_str().is_empty() => {
            if f.is_absolute() {
                f.clone()
            } else {
                config_parent(config_path).join(f)
            }
        }
        _ => config_parent(config_path).join(default_name),
    }
}

/// Resolve the rules file path (configured or `rules.json` beside the config).
pub fn resolve_rules_path(config: &Config, config_path: &Path) -> PathBuf {
    resolve_file(config.rules.file.as_ref(), config_path, "rules.json")
}

/// Resolve the state file path (configured or `state.json` beside the config).
pub fn resolve_state_path(config: &Config, config_path: &Path) -> PathBuf {
    resolve_file(config.storage.file.as_ref(), config_path, "state.json")
}

/// Load config from the default path (or CHATREP_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
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
