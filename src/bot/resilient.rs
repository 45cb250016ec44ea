//! Telegram sends with automatic retry, and the scheduler's Telegram notifier.

use crate::bot::views::{fired_keyboard, DefaultReminderView, ReminderView};
use crate::reminder::{Notifier, Reminder};
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode};
use tracing::debug;

/// Send an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot
            .send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit an HTML message in place, tolerating "message is not modified".
///
/// Returns `false` when the edit did not happen.
pub async fn edit_html_safe(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    keyboard: Option<InlineKeyboardMarkup>,
) -> bool {
    const ERROR_NOT_MODIFIED: &str = "message is not modified";

    let mut req = bot
        .edit_message_text(chat_id, msg_id, text.into())
        .parse_mode(ParseMode::Html);
    if let Some(markup) = keyboard {
        req = req.reply_markup(markup);
    }

    match req.await {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_MODIFIED) {
                debug!("Message update skipped: {err_msg}");
            } else {
                tracing::warn!("Failed to edit message: {e}");
            }
            false
        }
    }
}

/// Delivers fired reminders into their chats
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    /// Create a notifier sending through `bot`
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, reminder: &Reminder) -> Result<()> {
        send_html_resilient(
            &self.bot,
            ChatId(reminder.chat_id),
            DefaultReminderView::fired(reminder),
            Some(fired_keyboard(reminder.id)),
        )
        .await
        .map(|_| ())
    }
}
