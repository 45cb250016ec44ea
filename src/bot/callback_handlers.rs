//! Inline keyboard callbacks: list cancel buttons, snooze / done under fired
//! reminders, and `/clear` confirmation.

use crate::bot::callback::CallbackAction;
use crate::bot::handlers::BotContext;
use crate::bot::resilient::{edit_html_safe, send_html_resilient};
use crate::bot::views::{list_keyboard, DefaultReminderView, ReminderView};
use crate::config::TELEGRAM_MESSAGE_LIMIT;
use anyhow::Result;
use chrono::{Duration, Utc};
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tracing::{info, warn};

type View = DefaultReminderView;

async fn answer(bot: &Bot, q: &CallbackQuery, text: Option<String>) {
    let mut req = bot.answer_callback_query(q.id.clone());
    if let Some(text) = text {
        req = req.text(text);
    }
    if let Err(e) = req.await {
        warn!("Failed to answer callback query: {e}");
    }
}

async fn remove_keyboard(bot: &Bot, chat_id: ChatId, msg_id: MessageId) {
    if let Err(e) = bot.edit_message_reply_markup(chat_id, msg_id).await {
        warn!("Failed to remove inline keyboard: {e}");
    }
}

/// Re-render a `/list` message after one of its reminders went away
async fn refresh_list(bot: &Bot, ctx: &BotContext, chat_id: ChatId, msg_id: MessageId) {
    let reminders = ctx.store.list_for_chat(chat_id.0).await;
    if reminders.is_empty() {
        edit_html_safe(bot, chat_id, msg_id, View::no_reminders(), None).await;
        return;
    }

    let text = View::reminder_list(&reminders, ctx.offset(chat_id).await);
    if text.len() <= TELEGRAM_MESSAGE_LIMIT {
        edit_html_safe(bot, chat_id, msg_id, text, Some(list_keyboard(&reminders))).await;
        return;
    }
    // The list was sent in several parts; only the buttons live here
    if let Err(e) = bot
        .edit_message_reply_markup(chat_id, msg_id)
        .reply_markup(list_keyboard(&reminders))
        .await
    {
        warn!("Failed to refresh list keyboard: {e}");
    }
}

/// Handle a press on any of the bot's inline buttons.
///
/// # Errors
///
/// Returns an error if a Telegram request fails.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, ctx: BotContext) -> Result<()> {
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        answer(&bot, &q, None).await;
        return Ok(());
    };
    let Some((chat_id, msg_id)) = q.message.as_ref().map(|m| (m.chat().id, m.id())) else {
        answer(&bot, &q, None).await;
        return Ok(());
    };
    let user_id = q.from.id.0.cast_signed();

    match action {
        CallbackAction::Cancel(id) => {
            let reply = match ctx.store.cancel(chat_id.0, id).await {
                Ok(Some(_)) => {
                    info!("User {user_id} cancelled reminder #{id} from the list");
                    View::cancelled(id)
                }
                Ok(None) => View::not_found(id),
                Err(e) => {
                    answer(&bot, &q, None).await;
                    send_html_resilient(&bot, chat_id, View::store_error(&e), None).await?;
                    return Ok(());
                }
            };
            answer(&bot, &q, Some(reply)).await;
            refresh_list(&bot, &ctx, chat_id, msg_id).await;
        }
        CallbackAction::Snooze { id, minutes } => {
            let due_at = Utc::now() + Duration::minutes(i64::from(minutes));
            match ctx.store.snooze(chat_id.0, id, due_at).await {
                Ok(Some(reminder)) => {
                    ctx.wake.notify_one();
                    let offset = ctx.offset(chat_id).await;
                    answer(&bot, &q, Some(View::snoozed(&reminder, offset))).await;
                }
                Ok(None) => {
                    answer(&bot, &q, Some(View::snooze_expired().to_string())).await;
                }
                Err(e) => {
                    answer(&bot, &q, None).await;
                    send_html_resilient(&bot, chat_id, View::store_error(&e), None).await?;
                    return Ok(());
                }
            }
            remove_keyboard(&bot, chat_id, msg_id).await;
        }
        CallbackAction::Done(_) => {
            answer(&bot, &q, Some(View::done().to_string())).await;
            remove_keyboard(&bot, chat_id, msg_id).await;
        }
        CallbackAction::ClearConfirm => {
            answer(&bot, &q, None).await;
            let removed = ctx.store.clear_chat(chat_id.0).await?;
            info!("User {user_id} cleared {removed} reminders in chat {chat_id}");
            edit_html_safe(&bot, chat_id, msg_id, View::cleared(removed), None).await;
        }
        CallbackAction::ClearAbort => {
            answer(&bot, &q, None).await;
            edit_html_safe(&bot, chat_id, msg_id, View::clear_aborted(), None).await;
        }
    }

    Ok(())
}
