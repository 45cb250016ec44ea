//! Text helpers and the Telegram retry wrapper.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Truncates a string to at most `max_chars` characters.
///
/// # Examples
///
/// ```
/// use tg_reminder_bot::utils::truncate_str;
///
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Shortens a single-line preview, adding an ellipsis when cut.
#[must_use]
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    format!("{}…", truncate_str(&flat, max_chars.saturating_sub(1)))
}

/// Splits a message into parts of at most `max_len` bytes.
///
/// Lines are kept whole where possible; a single line longer than the limit
/// is cut on grapheme boundaries.
#[must_use]
pub fn split_long_message(message: &str, max_len: usize) -> Vec<String> {
    if message.is_empty() || max_len == 0 {
        return Vec::new();
    }
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        let trimmed = current.trim_end();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
        current.clear();
    };

    for line in message.lines() {
        if current.len() + line.len() + 1 > max_len {
            flush(&mut current);
        }
        if line.len() <= max_len {
            current.push_str(line);
            current.push('\n');
            continue;
        }
        for grapheme in line.graphemes(true) {
            if current.len() + grapheme.len() > max_len {
                flush(&mut current);
            }
            current.push_str(grapheme);
        }
        current.push('\n');
    }
    flush(&mut current);

    parts
}

/// Retries a Telegram API call with exponential backoff and jitter.
///
/// # Errors
///
/// Returns the last error once all retries are exhausted.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} retries: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}
