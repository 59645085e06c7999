//! Helpers for making error text safe to persist and log.
//!
//! Applicant error messages end up in `analysis_results.error_message` and in
//! logs, so anything that looks like contact details is masked before the
//! message is truncated.

use std::sync::LazyLock;

use regex::Regex;

/// Upper bound on stored per-applicant error messages, in characters.
pub const MAX_ERROR_CHARS: usize = 500;

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static RE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static RE_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").unwrap());

/// Masks emails, URLs and phone-like digit runs.
pub fn redact_pii(text: &str) -> String {
    let text = RE_EMAIL.replace_all(text, "[email]");
    let text = RE_URL.replace_all(&text, "[url]");
    RE_PHONE.replace_all(&text, "[number]").into_owned()
}

/// Truncates to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Redacts then truncates to `MAX_ERROR_CHARS`.
pub fn safe_error_message(text: &str) -> String {
    truncate_chars(&redact_pii(text), MAX_ERROR_CHARS)
}
