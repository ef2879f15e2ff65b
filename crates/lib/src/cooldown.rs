//! Per-(conversation, trigger) cooldown bookkeeping.
//!
//! Soft anti-spam state: lives only in process memory and is lost on
//! restart. The check-and-set in [`CooldownTracker::try_fire`] is atomic
//! under one mutex so two near-simultaneous events for the same key cannot
//! both pass the gate.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Stale entries older than this many windows are dropped by [`CooldownTracker::sweep`].
pub const SWEEP_FACTOR: u32 = 10;

/// Tracks the last fire time per (conversation, normalized trigger) pair.
pub struct CooldownTracker {
    last_fired: Mutex<HashMap<(String, String), Instant>>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// If at least `window` has elapsed since the last fire for this key
    /// (a missing entry counts as infinitely stale), record `now` as the
    /// new last fire and return true. Otherwise leave state untouched and
    /// return false; the caller must silently skip the event.
    pub async fn try_fire(
        &self,
        conversation_id: &str,
        trigger: &str,
        now: Instant,
        window: Duration,
    ) -> bool {
        let mut map = self.last_fired.lock().await;
        let key = (conversation_id.to_string(), trigger.to_string());
        if let Some(last) = map.get(&key) {
            if now.saturating_duration_since(*last) < window {
                return false;
            }
        }
        map.insert(key, now);
        true
    }

    /// Drop entries whose last fire is older than [`SWEEP_FACTOR`] windows.
    /// Returns how many entries were removed. Keeps the map bounded across
    /// long uptimes with many distinct conversations and triggers.
    pub async fn sweep(&self, now: Instant, window: Duration) -> usize {
        let horizon = window * SWEEP_FACTOR;
        let mut map = self.last_fired.lock().await;
        let before = map.len();
        map.retain(|_, last| now.saturating_duration_since(*last) < horizon);
        before - map.len()
    }

    /// Number of tracked keys (sweep diagnostics).
    pub async fn len(&self) -> usize {
        self.last_fired.lock().await.len()
    }
}
