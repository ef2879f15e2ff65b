//! Trigger rules: ordered trigger→responses table with a matching predicate.
//!
//! Rules are loaded once (from a JSON file or inline values), validated and
//! normalized into a single shape, and read-only afterwards. Matching scans
//! rules in load order; the first rule that matches wins.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// How a trigger is compared against inbound text (after normalization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Trigger is a substring of the text.
    Contains,
    /// Text equals the trigger.
    Exact,
}

/// One trigger rule: what to watch for and the candidate replies.
#[derive(Debug, Clone)]
pub struct Rule {
    pub trigger: String,
    pub responses: Vec<String>,
    pub mode: MatchMode,
}

/// Rule validation errors. Any bad entry rejects the whole set.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {index}: trigger is empty after normalization")]
    EmptyTrigger { index: usize },
    #[error("rule {index}: response list is empty")]
    EmptyResponses { index: usize },
    #[error("reading rules from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing rules from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw on-disk rule shapes. Older rule files used `[trigger, response]`
/// tuples (mode defaults to contains) or `[trigger, response, mode]`;
/// newer ones use an object with a string-or-list `responses` field.
/// All shapes are normalized into [`Rule`] at load time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawRule {
    Pair(String, String),
    Triple(String, String, MatchMode),
    Entry {
        trigger: String,
        responses: OneOrMany,
        #[serde(default = "default_mode")]
        mode: MatchMode,
    },
}

/// A single response string or a list of candidates.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn default_mode() -> MatchMode {
    MatchMode::Contains
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Trim surrounding whitespace and lowercase. Applied identically to
/// triggers and inbound text before any comparison.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Ordered, immutable rule table.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate and normalize raw entries into a rule set.
    /// Fails on the first empty trigger or empty response list.
    pub fn from_raw(raw: Vec<RawRule>) -> Result<Self, RuleError> {
        let mut rules = Vec::with_capacity(raw.len());
        for (index, entry) in raw.into_iter().enumerate() {
            let (trigger, responses, mode) = match entry {
                RawRule::Pair(t, r) => (t, vec![r], MatchMode::Contains),
                RawRule::Triple(t, r, m) => (t, vec![r], m),
                RawRule::Entry {
                    trigger,
                    responses,
                    mode,
                } => (trigger, responses.into_vec(), mode),
            };
            if normalize(&trigger).is_empty() {
                return Err(RuleError::EmptyTrigger { index });
            }
            if responses.is_empty() {
                return Err(RuleError::EmptyResponses { index });
            }
            rules.push(Rule {
                trigger,
                responses,
                mode,
            });
        }
        Ok(Self { rules })
    }

    /// Load rules from a JSON file (an array of raw rule entries).
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let s = std::fs::read_to_string(path).map_err(|e| RuleError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: Vec<RawRule> = serde_json::from_str(&s).map_err(|e| RuleError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_raw(raw)
    }

    /// Scan rules in load order and return the first match together with
    /// its normalized trigger (the cooldown key component). Empty normalized
    /// text or trigger never matches.
    pub fn first_match(&self, text: &str) -> Option<(&Rule, String)> {
        let incoming = normalize(text);
        if incoming.is_empty() {
            return None;
        }
        for rule in &self.rules {
            let trigger = normalize(&rule.trigger);
            if trigger.is_empty() {
                continue;
            }
            let hit = match rule.mode {
                MatchMode::Exact => incoming == trigger,
                MatchMode::Contains => incoming.contains(&trigger),
            };
            if hit {
                return Some((rule, trigger));
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
