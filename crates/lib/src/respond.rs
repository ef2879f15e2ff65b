//! Response selection and placeholder rendering.
//!
//! Picks one candidate reply uniformly at random and substitutes the fixed
//! placeholder tokens in a single pass. Substituted text is never re-scanned,
//! so a `{text}` value containing a token stays literal.

use crate::channels::InboundEvent;
use crate::rules::Rule;
use std::time::Duration;

/// Pick one response candidate and render its placeholders for this event.
/// Returns the rendered text; a result that trims to empty means the caller
/// must suppress the send.
pub fn render(rule: &Rule, event: &InboundEvent) -> String {
    let candidate = if rule.responses.len() == 1 {
        &rule.responses[0]
    } else {
        &rule.responses[pick_index(rule.responses.len())]
    };
    substitute(candidate, event)
}

/// Uniform random index in `0..len` via the OS RNG (rejection sampling, so
/// the distribution is unbiased). Falls back to 0 if the OS RNG fails.
fn pick_index(len: usize) -> usize {
    debug_assert!(len > 0);
    let len = len as u32;
    let zone = u32::MAX - (u32::MAX % len);
    loop {
        let mut bytes = [0u8; 4];
        if let Err(e) = getrandom::getrandom(&mut bytes) {
            log::debug!("getrandom failed, using first candidate: {}", e);
            return 0;
        }
        let value = u32::from_le_bytes(bytes);
        if value < zone {
            return (value % len) as usize;
        }
    }
}

/// Uniform random delay in `[min, max]`. Returns zero when `max` is zero
/// (delay disabled) or the range is inverted.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max.is_zero() || max < min {
        return Duration::ZERO;
    }
    let span_ms = (max - min).as_millis() as u64;
    if span_ms == 0 {
        return min;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return min;
    }
    let offset = u64::from_le_bytes(bytes) % (span_ms + 1);
    min + Duration::from_millis(offset)
}

/// Replace `{first}`, `{username}`, `{mention}`, `{chat}`, and `{text}` in
/// one left-to-right pass. Unknown braces are copied through verbatim.
fn substitute(template: &str, event: &InboundEvent) -> String {
    const TOKENS: [&str; 5] = ["{first}", "{username}", "{mention}", "{chat}", "{text}"];

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'outer: while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        for token in TOKENS {
            if tail.starts_with(token) {
                out.push_str(&expand(token, event));
                rest = &tail[token.len()..];
                continue 'outer;
            }
        }
        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

fn expand(token: &str, event: &InboundEvent) -> String {
    match token {
        "{first}" => event.sender_first_name.clone(),
        "{username}" => event
            .sender_username
            .as_ref()
            .map(|u| format!("@{}", u))
            .unwrap_or_default(),
        // Plain-text mention: @handle when available, else the first name.
        "{mention}" => event
            .sender_username
            .as_ref()
            .map(|u| format!("@{}", u))
            .unwrap_or_else(|| event.sender_first_name.clone()),
        "{chat}" => event.conversation_title.clone().unwrap_or_default(),
        "{text}" => event.text.clone(),
        _ => String::new(),
    }
}
