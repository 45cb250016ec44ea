use crate::bot::callback_handlers::handle_callback;
use crate::bot::handlers::{self, get_user_id_safe, BotContext, Command};
use crate::bot::resilient::TelegramNotifier;
use crate::bot::state::{ReminderDialogue, State};
use crate::bot::views::{DefaultReminderView, ReminderView};
use crate::bot::AccessGuard;
use crate::config::{get_unauthorized_cache_max_size, get_unauthorized_cooldown, Settings};
use crate::reminder::{ReminderStore, Scheduler};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the bot until Ctrl-C, then stop the scheduler.
pub async fn run_bot(settings: Arc<Settings>) {
    let store = init_store(&settings).await;
    let bot = Bot::new(settings.telegram_token.clone());

    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(TelegramNotifier::new(bot.clone())),
        Duration::from_secs(settings.scheduler_tick_secs),
    );
    let ctx = BotContext::new(store, settings.clone(), scheduler.wake_handle());
    let cancel = CancellationToken::new();
    let scheduler_task = scheduler.spawn(cancel.clone());

    let bot_state = init_bot_state();
    let access_guard = init_access_guard(&settings);
    let handler = setup_handler();

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register the command menu: {e}");
    }

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, bot_state, access_guard])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, waiting for the scheduler...");
    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {e}");
    }
}

async fn init_store(settings: &Settings) -> Arc<ReminderStore> {
    match ReminderStore::open(&settings.data_file).await {
        Ok(store) => {
            info!(
                "Reminder store opened at {} ({} pending).",
                settings.data_file.display(),
                store.pending_count().await
            );
            Arc::new(store)
        }
        Err(e) => {
            error!(
                "Failed to open reminder store {}: {}",
                settings.data_file.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn init_bot_state() -> Arc<InMemStorage<State>> {
    InMemStorage::<State>::new()
}

fn init_access_guard(settings: &Settings) -> Arc<AccessGuard> {
    let allowed = settings.allowed_users();
    let cooldown = get_unauthorized_cooldown();
    let max_size = get_unauthorized_cache_max_size();

    if allowed.is_empty() {
        warn!("ALLOWED_USERS is empty: the bot answers everyone.");
    }
    info!(
        "Initializing AccessGuard ({} allowed users, cooldown: {}s, max_size: {})",
        allowed.len(),
        cooldown,
        max_size
    );

    Arc::new(AccessGuard::new(allowed, cooldown, max_size))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, guard: Arc<AccessGuard>| {
                    guard.is_allowed(q.from.id.0.cast_signed())
                })
                .endpoint(handle_callback_query),
        )
        // Buttons pressed by users outside the allow-list
        .branch(Update::filter_callback_query().endpoint(answer_unauthorized_callback))
        .branch(
            Update::filter_message().branch(
                // Main branch for authorized users
                dptree::filter(|msg: Message, guard: Arc<AccessGuard>| {
                    guard.is_allowed(get_user_id_safe(&msg))
                })
                .enter_dialogue::<Message, InMemStorage<State>, State>()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    // Another member's dialogue in a group: plain chatter
                    dptree::filter(|msg: Message, state: State| {
                        !state.accepts(get_user_id_safe(&msg), msg.chat.is_private())
                    })
                    .endpoint(handle_start_text),
                )
                .branch(
                    dptree::case![State::Start]
                        .filter(|msg: Message| msg.text().is_some())
                        .endpoint(handle_start_text),
                )
                .branch(
                    dptree::case![State::AwaitingWhen { owner }].endpoint(handle_awaiting_when),
                )
                .branch(
                    dptree::case![State::AwaitingText { owner, due_at }]
                        .endpoint(handle_awaiting_text),
                )
                // Stickers, photos and the like from allowed users
                .branch(dptree::endpoint(ignore_message)),
            ),
        )
        .branch(
            // All who are not in the filter above are unauthorized
            Update::filter_message().endpoint(handle_unauthorized),
        )
}

async fn handle_unauthorized(
    bot: Bot,
    msg: Message,
    guard: Arc<AccessGuard>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    let user_name = msg
        .from
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |u| u.first_name.clone());

    // Group chatter from outsiders is not answered at all
    if !msg.chat.is_private() {
        return respond(());
    }

    if guard.should_reply_denied(user_id, &user_name).await {
        info!(
            "⛔️ Unauthorized access from user {} ({}). Sending denial message.",
            user_id, user_name
        );

        if let Err(e) = bot
            .send_message(msg.chat.id, DefaultReminderView::access_denied())
            .await
        {
            error!("Failed to send access denied message to {}: {}", user_id, e);
        } else {
            guard.mark_denied(user_id).await;
        }
    }

    respond(())
}

async fn answer_unauthorized_callback(
    bot: Bot,
    q: CallbackQuery,
) -> Result<(), teloxide::RequestError> {
    info!("Ignoring button press from unauthorized user {}", q.from.id);
    if let Err(e) = bot.answer_callback_query(q.id).await {
        warn!("Failed to answer callback query: {e}");
    }
    respond(())
}

async fn ignore_message() -> Result<(), teloxide::RequestError> {
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: BotContext,
    dialogue: ReminderDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_command(bot, msg, cmd, ctx, dialogue).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_start_text(
    bot: Bot,
    msg: Message,
    ctx: BotContext,
    dialogue: ReminderDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_text(bot, msg, ctx, dialogue).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_awaiting_when(
    bot: Bot,
    msg: Message,
    ctx: BotContext,
    dialogue: ReminderDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_awaiting_when(bot, msg, ctx, dialogue).await {
        error!("Dialogue handler error: {}", e);
    }
    respond(())
}

async fn handle_awaiting_text(
    bot: Bot,
    msg: Message,
    ctx: BotContext,
    dialogue: ReminderDialogue,
    (_owner, due_at): (i64, DateTime<Utc>),
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_awaiting_text(bot, msg, ctx, dialogue, due_at).await {
        error!("Dialogue handler error: {}", e);
    }
    respond(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    ctx: BotContext,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handle_callback(bot, q, ctx).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::ops::ControlFlow;
    use teloxide::dispatching::dialogue::Storage;
    use teloxide::types::Me;
    use tokio::sync::Notify;

    const ALLOWED: i64 = 2;

    struct Harness {
        bot: Bot,
        ctx: BotContext,
        guard: Arc<AccessGuard>,
        storage: Arc<InMemStorage<State>>,
        me: Me,
    }

    impl Harness {
        fn new() -> anyhow::Result<Self> {
            // Nothing listens there, so any API call fails fast
            Self::with_api("http://127.0.0.1:1/")
        }

        fn with_api(api: &str) -> anyhow::Result<Self> {
            let api = reqwest::Url::parse(api)?;
            let settings = Arc::new(Settings {
                telegram_token: "1:test".to_string(),
                allowed_users_str: Some(ALLOWED.to_string()),
                data_file: "unused.json".into(),
                default_utc_offset: 0,
                scheduler_tick_secs: 60,
            });
            let me = serde_json::from_value(serde_json::json!({
                "id": 100,
                "is_bot": true,
                "first_name": "Reminder",
                "username": "reminder_bot",
                "can_join_groups": true,
                "can_read_all_group_messages": true,
                "supports_inline_queries": false,
                "has_main_web_app": false
            }))?;
            Ok(Self {
                bot: Bot::new("1:test").set_api_url(api),
                ctx: BotContext::new(
                    Arc::new(ReminderStore::in_memory()),
                    settings,
                    Arc::new(Notify::new()),
                ),
                guard: Arc::new(AccessGuard::new(HashSet::from([ALLOWED]), 60, 100)),
                storage: InMemStorage::<State>::new(),
                me,
            })
        }

        async fn dispatch(
            &self,
            update: serde_json::Value,
        ) -> anyhow::Result<ControlFlow<Result<(), teloxide::RequestError>>> {
            let update: Update = serde_json::from_str(&update.to_string())?;
            let deps = dptree::deps![
                self.bot.clone(),
                update,
                self.ctx.clone(),
                self.guard.clone(),
                self.storage.clone(),
                self.me.clone()
            ];
            let flow = tokio::time::timeout(
                Duration::from_secs(30),
                setup_handler().dispatch(deps),
            )
            .await?;
            Ok(match flow {
                ControlFlow::Break(result) => ControlFlow::Break(result),
                ControlFlow::Continue(_) => ControlFlow::Continue(()),
            })
        }
    }

    fn group_message(user_id: i64, text: &str) -> serde_json::Value {
        serde_json::json!({
            "update_id": 2,
            "message": {
                "message_id": 10,
                "date": 1_767_225_600,
                "chat": { "id": -100, "type": "group", "title": "Friends" },
                "from": { "id": user_id, "is_bot": false, "first_name": "Member" },
                "text": text
            }
        })
    }

    #[tokio::test]
    async fn test_command_reply_is_retried() -> anyhow::Result<()> {
        use crate::config::TELEGRAM_API_MAX_RETRIES;
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Accepts and drops every connection, so each send fails
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::Relaxed);
                drop(stream);
            }
        });

        let harness = Harness::with_api(&format!("http://{addr}/"))?;
        let update = serde_json::json!({
            "update_id": 3,
            "message": {
                "message_id": 11,
                "date": 1_767_225_600,
                "chat": { "id": ALLOWED, "type": "private", "first_name": "Member" },
                "from": { "id": ALLOWED, "is_bot": false, "first_name": "Member" },
                "text": "/help"
            }
        });

        let flow = harness.dispatch(update).await?;
        server.abort();

        assert!(matches!(flow, ControlFlow::Break(Ok(()))));
        let attempts = attempts.load(Ordering::Relaxed);
        assert!(attempts > 1, "reply was sent only once");
        assert!(attempts <= 1 + TELEGRAM_API_MAX_RETRIES);
        Ok(())
    }

    #[tokio::test]
    async fn test_unauthorized_button_press_is_handled() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let update = serde_json::json!({
            "update_id": 1,
            "callback_query": {
                "id": "42",
                "from": { "id": 999, "is_bot": false, "first_name": "Stranger" },
                "chat_instance": "1",
                "data": "del:1"
            }
        });

        let flow = harness.dispatch(update).await?;
        assert!(matches!(flow, ControlFlow::Break(Ok(()))));
        Ok(())
    }

    #[tokio::test]
    async fn test_group_dialogue_ignores_other_members() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let chat = ChatId(-100);
        let started = State::AwaitingWhen { owner: 1 };
        harness
            .storage
            .clone()
            .update_dialogue(chat, started.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;

        // An abort word from someone else must not end the owner's dialogue
        let flow = harness.dispatch(group_message(ALLOWED, "отмена")).await?;
        assert!(matches!(flow, ControlFlow::Break(Ok(()))));

        let state = harness
            .storage
            .clone()
            .get_dialogue(chat)
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(state, Some(started));
        Ok(())
    }
}
