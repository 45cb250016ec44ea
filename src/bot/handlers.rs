//! Command, dialogue and free-text handlers

use crate::bot::resilient::send_html_resilient;
use crate::bot::state::{ReminderDialogue, State};
use crate::bot::views::{
    clear_confirmation_keyboard, list_keyboard, DefaultReminderView, ReminderView,
};
use crate::config::{Settings, TELEGRAM_MESSAGE_LIMIT};
use crate::random::{choose, flip_coin, split_options, DiceRoll};
use crate::reminder::when::{offset_from_minutes, parse_every, parse_offset, parse_when};
use crate::reminder::{ReminderDraft, ReminderStore, StoreError, WhenError};
use crate::utils::split_long_message;
use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, Utc};
use lazy_regex::lazy_regex;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use tokio::sync::Notify;
use tracing::{error, info, warn};

type View = DefaultReminderView;

static RE_FREE_TEXT: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?is)^\s*(?:remind\s+me|напомни(?:\s+мне)?)(?:\s+(.*))?$");
static RE_LEADING_TO: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?i)^(?:to|about|что|чтобы|о|об)\s+");

/// Supported bot commands
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Поддерживаемые команды:")]
pub enum Command {
    /// Greeting
    #[command(description = "Начать работу.")]
    Start,
    /// Usage summary
    #[command(description = "Справка.")]
    Help,
    /// One-shot reminder
    #[command(description = "Напомнить: /remind 10m текст.")]
    Remind(String),
    /// Repeating reminder
    #[command(description = "Повторять: /every 1d 09:00 текст.")]
    Every(String),
    /// Pending reminders of the chat
    #[command(description = "Список напоминаний.")]
    List,
    /// Remove one reminder
    #[command(description = "Удалить напоминание: /cancel id.")]
    Cancel(String),
    /// Remove every reminder of the chat
    #[command(description = "Удалить все напоминания чата.")]
    Clear,
    /// Show or set the chat's UTC offset
    #[command(description = "Часовой пояс: /tz +3.")]
    Tz(String),
    /// Current time in the chat's offset
    #[command(description = "Текущее время.")]
    Time,
    /// Dice roll
    #[command(description = "Бросить кубики: /roll 2d6.")]
    Roll(String),
    /// Coin flip
    #[command(description = "Подбросить монетку.")]
    Coin,
    /// Random pick from a list
    #[command(description = "Выбрать: /choose a | b.")]
    Choose(String),
}

/// Dependencies shared by message and callback handlers
#[derive(Clone)]
pub struct BotContext {
    /// Reminder state
    pub store: Arc<ReminderStore>,
    /// Loaded settings
    pub settings: Arc<Settings>,
    /// Wakes the scheduler after a reminder was added
    pub wake: Arc<Notify>,
}

impl BotContext {
    /// Bundle handler dependencies
    #[must_use]
    pub const fn new(
        store: Arc<ReminderStore>,
        settings: Arc<Settings>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            settings,
            wake,
        }
    }

    /// UTC offset in minutes used for a chat
    pub async fn offset_minutes(&self, chat_id: ChatId) -> i32 {
        self.store
            .chat_offset(chat_id.0)
            .await
            .unwrap_or(self.settings.default_utc_offset)
    }

    /// UTC offset used for a chat
    pub async fn offset(&self, chat_id: ChatId) -> FixedOffset {
        offset_from_minutes(self.offset_minutes(chat_id).await)
    }
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Outcome of reading reminder arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderRequest {
    /// Time and text are known
    Ready(ReminderDraft),
    /// Only the time was given; the text comes in the next message
    NeedsText(DateTime<Utc>),
}

fn reminder_text(rest: &str) -> String {
    RE_LEADING_TO.replace(rest, "").trim().to_string()
}

/// Read `<when> <text>` into a one-shot reminder.
///
/// # Errors
///
/// Returns a [`WhenError`] if the time expression is not usable.
pub fn plan_reminder(
    args: &str,
    chat_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<ReminderRequest, WhenError> {
    let when = parse_when(args, now, offset)?;
    let text = reminder_text(&when.rest);
    if text.is_empty() {
        return Ok(ReminderRequest::NeedsText(when.due_at));
    }
    Ok(ReminderRequest::Ready(ReminderDraft::once(
        chat_id,
        user_id,
        text,
        when.due_at,
    )))
}

/// Read `/every` arguments into a repeating reminder; `None` when the text
/// is missing.
///
/// # Errors
///
/// Returns a [`WhenError`] if the interval or clock time is not usable.
pub fn plan_repeating(
    args: &str,
    chat_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Option<ReminderDraft>, WhenError> {
    let every = parse_every(args, now, offset)?;
    let text = reminder_text(&every.when.rest);
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(ReminderDraft::repeating(
        chat_id,
        user_id,
        text,
        every.when.due_at,
        every.interval_secs,
    )))
}

/// Arguments of a "remind me ..." / "напомни ..." message, if it is one
#[must_use]
pub fn free_text_request(text: &str) -> Option<&str> {
    let caps = RE_FREE_TEXT.captures(text)?;
    Some(caps.get(1).map_or("", |m| m.as_str().trim()))
}

/// Whether a message aborts the running dialogue
#[must_use]
pub fn is_dialogue_abort(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "отмена" | "отменить" | "cancel" | "/cancel" | "стоп" | "stop"
    )
}

/// Reminder id from `/cancel` arguments, accepting a leading `#`
#[must_use]
pub fn parse_reminder_id(args: &str) -> Option<u64> {
    args.trim().trim_start_matches('#').parse().ok()
}

async fn reply_html(bot: &Bot, chat_id: ChatId, text: impl Into<String>) -> Result<()> {
    send_html_resilient(bot, chat_id, text, None).await?;
    Ok(())
}

fn log_store_error(e: &StoreError) {
    if matches!(e, StoreError::Io(_) | StoreError::Json(_)) {
        error!("Reminder store failure: {e}");
    }
}

/// Store a draft and confirm it. Returns whether the reminder was saved.
async fn schedule(
    bot: &Bot,
    chat_id: ChatId,
    ctx: &BotContext,
    draft: ReminderDraft,
) -> Result<bool> {
    match ctx.store.add(draft).await {
        Ok(reminder) => {
            ctx.wake.notify_one();
            let offset = ctx.offset(chat_id).await;
            reply_html(bot, chat_id, View::scheduled(&reminder, offset)).await?;
            Ok(true)
        }
        Err(e) => {
            log_store_error(&e);
            reply_html(bot, chat_id, View::store_error(&e)).await?;
            Ok(false)
        }
    }
}

async fn update_dialogue(dialogue: &ReminderDialogue, state: State) -> Result<()> {
    dialogue
        .update(state)
        .await
        .map_err(|e| anyhow!(e.to_string()))
}

async fn exit_dialogue(dialogue: &ReminderDialogue) -> Result<()> {
    dialogue.exit().await.map_err(|e| anyhow!(e.to_string()))
}

/// Handle `<when> <text>` from `/remind` or a free-text request
async fn remind(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    dialogue: &ReminderDialogue,
    args: &str,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let owner = get_user_id_safe(msg);
    if args.trim().is_empty() {
        update_dialogue(dialogue, State::AwaitingWhen { owner }).await?;
        return reply_html(bot, chat_id, View::ask_when()).await;
    }

    let offset = ctx.offset(chat_id).await;
    match plan_reminder(args, chat_id.0, owner, Utc::now(), offset) {
        Ok(ReminderRequest::Ready(draft)) => {
            schedule(bot, chat_id, ctx, draft).await?;
        }
        Ok(ReminderRequest::NeedsText(due_at)) => {
            update_dialogue(dialogue, State::AwaitingText { owner, due_at }).await?;
            reply_html(bot, chat_id, View::ask_text(due_at, offset)).await?;
        }
        Err(e) => reply_html(bot, chat_id, View::when_error(&e)).await?,
    }
    Ok(())
}

async fn every(bot: &Bot, msg: &Message, ctx: &BotContext, args: &str) -> Result<()> {
    let chat_id = msg.chat.id;
    if args.trim().is_empty() {
        return reply_html(bot, chat_id, View::every_usage()).await;
    }

    let offset = ctx.offset(chat_id).await;
    match plan_repeating(args, chat_id.0, get_user_id_safe(msg), Utc::now(), offset) {
        Ok(Some(draft)) => {
            schedule(bot, chat_id, ctx, draft).await?;
        }
        Ok(None) => reply_html(bot, chat_id, View::every_usage()).await?,
        Err(e) => reply_html(bot, chat_id, View::when_error(&e)).await?,
    }
    Ok(())
}

/// Send the chat's pending reminders with cancel buttons under the last part.
///
/// # Errors
///
/// Returns an error if a Telegram request fails.
pub async fn send_list(bot: &Bot, chat_id: ChatId, ctx: &BotContext) -> Result<()> {
    let reminders = ctx.store.list_for_chat(chat_id.0).await;
    if reminders.is_empty() {
        return reply_html(bot, chat_id, View::no_reminders()).await;
    }

    let offset = ctx.offset(chat_id).await;
    let text = View::reminder_list(&reminders, offset);
    let parts = split_long_message(&text, TELEGRAM_MESSAGE_LIMIT);
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.into_iter().enumerate() {
        let keyboard = (i == last).then(|| list_keyboard(&reminders));
        send_html_resilient(bot, chat_id, part, keyboard).await?;
    }
    Ok(())
}

async fn cancel(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    dialogue: &ReminderDialogue,
    args: &str,
) -> Result<()> {
    let chat_id = msg.chat.id;
    if args.trim().is_empty() {
        // Bare /cancel leaves a running dialogue
        let state = dialogue.get().await.map_err(|e| anyhow!(e.to_string()))?;
        let user_id = get_user_id_safe(msg);
        let private = msg.chat.is_private();
        if state.is_some_and(|s| s != State::Start && s.accepts(user_id, private)) {
            exit_dialogue(dialogue).await?;
            return reply_html(bot, chat_id, View::dialogue_cancelled()).await;
        }
        return reply_html(bot, chat_id, View::cancel_usage()).await;
    }

    let Some(id) = parse_reminder_id(args) else {
        return reply_html(bot, chat_id, View::cancel_usage()).await;
    };
    match ctx.store.cancel(chat_id.0, id).await {
        Ok(Some(_)) => {
            info!("User {} cancelled reminder #{id}", get_user_id_safe(msg));
            reply_html(bot, chat_id, View::cancelled(id)).await
        }
        Ok(None) => reply_html(bot, chat_id, View::not_found(id)).await,
        Err(e) => {
            log_store_error(&e);
            reply_html(bot, chat_id, View::store_error(&e)).await
        }
    }
}

async fn clear(bot: &Bot, chat_id: ChatId, ctx: &BotContext) -> Result<()> {
    let count = ctx.store.list_for_chat(chat_id.0).await.len();
    if count == 0 {
        return reply_html(bot, chat_id, View::no_reminders()).await;
    }
    send_html_resilient(
        bot,
        chat_id,
        View::clear_confirmation(count),
        Some(clear_confirmation_keyboard()),
    )
    .await?;
    Ok(())
}

async fn timezone(bot: &Bot, chat_id: ChatId, ctx: &BotContext, args: &str) -> Result<()> {
    if args.trim().is_empty() {
        let minutes = ctx.offset_minutes(chat_id).await;
        return reply_html(bot, chat_id, View::timezone_current(minutes)).await;
    }

    match parse_offset(args) {
        Ok(minutes) => match ctx.store.set_chat_offset(chat_id.0, minutes).await {
            Ok(()) => {
                info!("Chat {chat_id} UTC offset set to {minutes} minutes");
                reply_html(bot, chat_id, View::timezone_set(minutes)).await
            }
            Err(e) => {
                log_store_error(&e);
                reply_html(bot, chat_id, View::store_error(&e)).await
            }
        },
        Err(e) => reply_html(bot, chat_id, View::when_error(&e)).await,
    }
}

fn roll_reply(args: &str) -> String {
    match DiceRoll::parse(args) {
        Ok(dice) => {
            let outcome = dice.roll(&mut rand::thread_rng());
            View::roll(&dice, &outcome)
        }
        Err(e) => View::random_error(&e),
    }
}

fn choose_reply(args: &str) -> String {
    match split_options(args) {
        Ok(options) => choose(&mut rand::thread_rng(), &options)
            .map_or_else(|| View::error_message("empty choice"), View::chosen),
        Err(e) => View::random_error(&e),
    }
}

/// Dispatch a parsed command.
///
/// # Errors
///
/// Returns an error if a Telegram request or dialogue update fails.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: BotContext,
    dialogue: ReminderDialogue,
) -> Result<()> {
    let chat_id = msg.chat.id;
    match cmd {
        Command::Start => {
            info!(
                "User {} ({}) started the bot",
                get_user_id_safe(&msg),
                get_user_name(&msg)
            );
            exit_dialogue(&dialogue).await?;
            reply_html(&bot, chat_id, View::welcome_message()).await
        }
        Command::Help => reply_html(&bot, chat_id, View::help_message()).await,
        Command::Remind(args) => remind(&bot, &msg, &ctx, &dialogue, &args).await,
        Command::Every(args) => every(&bot, &msg, &ctx, &args).await,
        Command::List => send_list(&bot, chat_id, &ctx).await,
        Command::Cancel(args) => cancel(&bot, &msg, &ctx, &dialogue, &args).await,
        Command::Clear => clear(&bot, chat_id, &ctx).await,
        Command::Tz(args) => timezone(&bot, chat_id, &ctx, &args).await,
        Command::Time => {
            let minutes = ctx.offset_minutes(chat_id).await;
            reply_html(&bot, chat_id, View::time_now(Utc::now(), minutes)).await
        }
        Command::Roll(args) => reply_html(&bot, chat_id, roll_reply(&args)).await,
        Command::Coin => {
            let side = flip_coin(&mut rand::thread_rng());
            reply_html(&bot, chat_id, View::coin(side)).await
        }
        Command::Choose(args) => reply_html(&bot, chat_id, choose_reply(&args)).await,
    }
}

/// Plain text outside of any dialogue.
///
/// # Errors
///
/// Returns an error if a Telegram request or dialogue update fails.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    ctx: BotContext,
    dialogue: ReminderDialogue,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if let Some(args) = free_text_request(text) {
        return remind(&bot, &msg, &ctx, &dialogue, args).await;
    }
    // Group chatter that is not addressed to the bot stays unanswered
    if msg.chat.is_private() {
        reply_html(&bot, msg.chat.id, View::free_text_hint()).await?;
    }
    Ok(())
}

/// Dialogue step: waiting for a time expression.
///
/// # Errors
///
/// Returns an error if a Telegram request or dialogue update fails.
pub async fn handle_awaiting_when(
    bot: Bot,
    msg: Message,
    ctx: BotContext,
    dialogue: ReminderDialogue,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        return reply_html(&bot, chat_id, View::ask_when()).await;
    };
    if is_dialogue_abort(text) {
        exit_dialogue(&dialogue).await?;
        return reply_html(&bot, chat_id, View::dialogue_cancelled()).await;
    }

    let offset = ctx.offset(chat_id).await;
    let owner = get_user_id_safe(&msg);
    match plan_reminder(text, chat_id.0, owner, Utc::now(), offset) {
        Ok(ReminderRequest::Ready(draft)) => {
            if schedule(&bot, chat_id, &ctx, draft).await? {
                exit_dialogue(&dialogue).await?;
            }
        }
        Ok(ReminderRequest::NeedsText(due_at)) => {
            update_dialogue(&dialogue, State::AwaitingText { owner, due_at }).await?;
            reply_html(&bot, chat_id, View::ask_text(due_at, offset)).await?;
        }
        // Stay in the step so the user can retry
        Err(e) => reply_html(&bot, chat_id, View::when_error(&e)).await?,
    }
    Ok(())
}

/// Dialogue step: time is known, waiting for the reminder text.
///
/// # Errors
///
/// Returns an error if a Telegram request or dialogue update fails.
pub async fn handle_awaiting_text(
    bot: Bot,
    msg: Message,
    ctx: BotContext,
    dialogue: ReminderDialogue,
    due_at: DateTime<Utc>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        let offset = ctx.offset(chat_id).await;
        return reply_html(&bot, chat_id, View::ask_text(due_at, offset)).await;
    };
    if is_dialogue_abort(text) {
        exit_dialogue(&dialogue).await?;
        return reply_html(&bot, chat_id, View::dialogue_cancelled()).await;
    }

    if due_at <= Utc::now() {
        warn!("Dialogue due time {due_at} passed while waiting for text; firing on next tick");
    }
    let draft = ReminderDraft::once(chat_id.0, get_user_id_safe(&msg), text, due_at);
    if schedule(&bot, chat_id, &ctx, draft).await? {
        exit_dialogue(&dialogue).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn utc() -> FixedOffset {
        offset_from_minutes(0)
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn test_commands_parse() {
        assert_eq!(
            Command::parse("/remind 10m tea", "bot").expect("command"),
            Command::Remind("10m tea".to_string())
        );
        assert_eq!(Command::parse("/list", "bot").expect("command"), Command::List);
        assert_eq!(
            Command::parse("/choose a | b", "bot").expect("command"),
            Command::Choose("a | b".to_string())
        );
    }

    #[test]
    fn test_plan_reminder_ready() {
        let request =
            plan_reminder("10m to drink water", 5, 7, now(), utc()).expect("planned");
        let ReminderRequest::Ready(draft) = request else {
            panic!("expected a ready draft");
        };
        assert_eq!(draft.text, "drink water");
        assert_eq!(draft.due_at, now() + Duration::minutes(10));
        assert_eq!((draft.chat_id, draft.user_id), (5, 7));
        assert_eq!(draft.repeat_secs, None);
    }

    #[test]
    fn test_plan_reminder_without_text_asks_for_it() {
        let request = plan_reminder("18:00", 1, 1, now(), utc()).expect("planned");
        assert_eq!(
            request,
            ReminderRequest::NeedsText(at(10, 18))
        );
    }

    #[test]
    fn test_plan_reminder_bad_time() {
        assert!(matches!(
            plan_reminder("someday maybe", 1, 1, now(), utc()),
            Err(WhenError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_plan_repeating() {
        let draft = plan_repeating("1d 09:00 vitamins", 1, 2, now(), utc())
            .expect("planned")
            .expect("has text");
        assert_eq!(draft.repeat_secs, Some(86_400));
        assert_eq!(draft.due_at, at(11, 9));

        assert_eq!(plan_repeating("1h", 1, 2, now(), utc()), Ok(None));
        assert_eq!(
            plan_repeating("30s spam", 1, 2, now(), utc()),
            Err(WhenError::IntervalTooShort)
        );
    }

    #[test]
    fn test_free_text_request() {
        assert_eq!(free_text_request("напомни через 10м чай"), Some("через 10м чай"));
        assert_eq!(free_text_request("Напомни мне завтра отчёт"), Some("завтра отчёт"));
        assert_eq!(
            free_text_request("remind me in 5 min stretch"),
            Some("in 5 min stretch")
        );
        assert_eq!(free_text_request("напомни"), Some(""));
        assert_eq!(free_text_request("напоминание"), None);
        assert_eq!(free_text_request("please remind me"), None);
    }

    #[test]
    fn test_free_text_plans_like_remind() {
        let args =
            free_text_request("напомни мне через 2 часа позвонить маме").expect("request");
        let request = plan_reminder(args, 1, 1, now(), utc()).expect("planned");
        let ReminderRequest::Ready(draft) = request else {
            panic!("expected a ready draft");
        };
        assert_eq!(draft.text, "позвонить маме");
        assert_eq!(draft.due_at, now() + Duration::hours(2));
    }

    #[test]
    fn test_dialogue_abort_words() {
        assert!(is_dialogue_abort(" Отмена "));
        assert!(is_dialogue_abort("cancel"));
        assert!(!is_dialogue_abort("10m"));
    }

    #[test]
    fn test_parse_reminder_id() {
        assert_eq!(parse_reminder_id("12"), Some(12));
        assert_eq!(parse_reminder_id(" #7 "), Some(7));
        assert_eq!(parse_reminder_id("seven"), None);
    }
}
