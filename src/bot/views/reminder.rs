//! Reminder UI components
//!
//! Contains keyboards, text messages, and formatters for every reply the
//! bot sends. All user-supplied text is HTML-escaped here.

use crate::bot::callback::CallbackAction;
use crate::config::SNOOZE_PRESETS_MINUTES;
use crate::random::{Coin, DiceRoll, RandomError, RollOutcome};
use crate::reminder::store::StoreError;
use crate::reminder::when::{format_interval, format_local, format_offset, WhenError};
use crate::reminder::Reminder;
use crate::utils::preview;
use chrono::{DateTime, FixedOffset, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Characters of reminder text shown per `/list` line
const LIST_PREVIEW_CHARS: usize = 80;
/// Cancel buttons per keyboard row
const CANCEL_BUTTONS_PER_ROW: usize = 4;

fn escape(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait definition
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for reminder UI view rendering
pub trait ReminderView {
    /// Greeting for `/start`
    fn welcome_message() -> &'static str;

    /// Usage summary for `/help`
    fn help_message() -> &'static str;

    /// First dialogue step of a bare `/remind`
    fn ask_when() -> &'static str;

    /// Second dialogue step
    fn ask_text(due_at: DateTime<Utc>, offset: FixedOffset) -> String;

    /// Dialogue aborted by the user
    fn dialogue_cancelled() -> &'static str;

    /// Confirmation after scheduling
    fn scheduled(reminder: &Reminder, offset: FixedOffset) -> String;

    /// The body of a delivered reminder
    fn fired(reminder: &Reminder) -> String;

    /// Rendered `/list`
    fn reminder_list(reminders: &[Reminder], offset: FixedOffset) -> String;

    /// `/list` with nothing pending
    fn no_reminders() -> &'static str;

    /// Reminder removed
    fn cancelled(id: u64) -> String;

    /// Unknown id or another chat's reminder
    fn not_found(id: u64) -> String;

    /// `/clear` confirmation prompt
    fn clear_confirmation(count: usize) -> String;

    /// Result of a confirmed `/clear`
    fn cleared(count: usize) -> String;

    /// `/clear` aborted
    fn clear_aborted() -> &'static str;

    /// Snooze accepted
    fn snoozed(reminder: &Reminder, offset: FixedOffset) -> String;

    /// The fired reminder dropped out of history
    fn snooze_expired() -> &'static str;

    /// Answer to the "done" button
    fn done() -> &'static str;

    /// Current chat offset
    fn timezone_current(minutes: i32) -> String;

    /// Offset updated
    fn timezone_set(minutes: i32) -> String;

    /// `/time`
    fn time_now(now: DateTime<Utc>, minutes: i32) -> String;

    /// Could not read a time expression
    fn when_error(error: &WhenError) -> String;

    /// Could not store the reminder
    fn store_error(error: &StoreError) -> String;

    /// Bad `/roll` or `/choose` arguments
    fn random_error(error: &RandomError) -> String;

    /// Dice result
    fn roll(dice: &DiceRoll, outcome: &RollOutcome) -> String;

    /// Coin result
    fn coin(side: Coin) -> &'static str;

    /// `/choose` result
    fn chosen(option: &str) -> String;

    /// `/every` usage
    fn every_usage() -> &'static str;

    /// `/cancel` usage
    fn cancel_usage() -> &'static str;

    /// Private chat text that is not a reminder request
    fn free_text_hint() -> &'static str;

    /// Reply to unauthorized users
    fn access_denied() -> &'static str;

    /// Unexpected internal failure
    fn error_message(error: &str) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Default implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Default Russian-language implementation of `ReminderView`
pub struct DefaultReminderView;

impl ReminderView for DefaultReminderView {
    fn welcome_message() -> &'static str {
        r#"<b>Привет!</b> Я напоминаю о делах, бросаю кубики и помогаю выбрать.

Попробуйте:
• <code>/remind 25m проверить духовку</code>
• <code>напомни через 2 часа позвонить маме</code>
• <code>/every 1d 09:00 выпить витамины</code>

Все команды: /help"#
    }

    fn help_message() -> &'static str {
        r#"<b>Напоминания</b>
/remind &lt;когда&gt; &lt;текст&gt; — одноразовое напоминание
/every &lt;интервал&gt; [HH:MM] &lt;текст&gt; — повторяющееся
/list — список с кнопками удаления
/cancel &lt;id&gt; — удалить напоминание
/clear — удалить все напоминания чата
/tz [+3 | -4:30] — часовой пояс чата
/time — текущее время чата

<b>Когда</b>: <code>10m</code>, <code>1h30m</code>, <code>через 2 часа</code>, <code>18:00</code>, <code>завтра 9:30</code>, <code>25.12 10:00</code>, <code>2026-12-31 23:59</code>

<b>Случайности</b>
/roll [2d6+1] — бросить кубики
/coin — подбросить монетку
/choose a | b | c — выбрать вариант"#
    }

    fn ask_when() -> &'static str {
        "⏰ Когда напомнить? Например: <code>30m</code>, <code>18:00</code>, <code>завтра 9:00</code>.\nДля отмены напишите «отмена»."
    }

    fn ask_text(due_at: DateTime<Utc>, offset: FixedOffset) -> String {
        format!(
            "📝 Напомню <b>{}</b>. О чём напомнить?",
            format_local(due_at, offset)
        )
    }

    fn dialogue_cancelled() -> &'static str {
        "Отменено."
    }

    fn scheduled(reminder: &Reminder, offset: FixedOffset) -> String {
        let repeat = reminder
            .repeat_secs
            .map(|secs| format!("\n🔁 Каждые {}", format_interval(secs)))
            .unwrap_or_default();
        format!(
            "✅ Напоминание <b>#{}</b> на <b>{}</b>{repeat}\n{}",
            reminder.id,
            format_local(reminder.due_at, offset),
            escape(&reminder.text)
        )
    }

    fn fired(reminder: &Reminder) -> String {
        format!("🔔 <b>Напоминание</b>\n\n{}", escape(&reminder.text))
    }

    fn reminder_list(reminders: &[Reminder], offset: FixedOffset) -> String {
        let mut out = format!("<b>Напоминания ({}):</b>\n", reminders.len());
        for reminder in reminders {
            let repeat = reminder
                .repeat_secs
                .map(|secs| format!(" 🔁 {}", format_interval(secs)))
                .unwrap_or_default();
            out.push_str(&format!(
                "\n<b>#{}</b> · {}{repeat}\n{}\n",
                reminder.id,
                format_local(reminder.due_at, offset),
                escape(&preview(&reminder.text, LIST_PREVIEW_CHARS))
            ));
        }
        out
    }

    fn no_reminders() -> &'static str {
        "📭 Напоминаний нет."
    }

    fn cancelled(id: u64) -> String {
        format!("🗑 Напоминание #{id} удалено.")
    }

    fn not_found(id: u64) -> String {
        format!("⚠️ Напоминание #{id} не найдено.")
    }

    fn clear_confirmation(count: usize) -> String {
        format!("⚠️ Удалить все напоминания этого чата ({count})?")
    }

    fn cleared(count: usize) -> String {
        format!("🗑 Удалено напоминаний: {count}.")
    }

    fn clear_aborted() -> &'static str {
        "Очистка отменена."
    }

    fn snoozed(reminder: &Reminder, offset: FixedOffset) -> String {
        format!(
            "⏰ Отложено до {} (#{})",
            format_local(reminder.due_at, offset),
            reminder.id
        )
    }

    fn snooze_expired() -> &'static str {
        "⚠️ Это напоминание уже нельзя отложить."
    }

    fn done() -> &'static str {
        "👍 Готово"
    }

    fn timezone_current(minutes: i32) -> String {
        format!(
            "🌍 Часовой пояс чата: <b>{}</b>\nИзменить: <code>/tz +3</code>",
            format_offset(minutes)
        )
    }

    fn timezone_set(minutes: i32) -> String {
        format!("🌍 Часовой пояс установлен: <b>{}</b>", format_offset(minutes))
    }

    fn time_now(now: DateTime<Utc>, minutes: i32) -> String {
        let offset = crate::reminder::when::offset_from_minutes(minutes);
        format!(
            "🕒 {} ({})",
            format_local(now, offset),
            format_offset(minutes)
        )
    }

    fn when_error(error: &WhenError) -> String {
        let reason = match error {
            WhenError::Empty => "не указано время".to_string(),
            WhenError::Unrecognized(token) => {
                format!("не понимаю время «{}»", escape(token))
            }
            WhenError::ZeroDuration => "интервал должен быть больше нуля".to_string(),
            WhenError::InPast(at) => format!("{} уже прошло", escape(at)),
            WhenError::TooFar => "слишком далеко, максимум год вперёд".to_string(),
            WhenError::IntervalTooShort => "повторять можно не чаще раза в минуту".to_string(),
            WhenError::BadOffset(value) => {
                format!("неверный часовой пояс «{}», пример: +3 или -4:30", escape(value))
            }
        };
        format!("⚠️ Ошибка: {reason}.\nПодробнее: /help")
    }

    fn store_error(error: &StoreError) -> String {
        match error {
            StoreError::LimitReached(max) => {
                format!("⚠️ В этом чате уже {max} напоминаний. Удалите лишние: /list")
            }
            StoreError::EmptyText => "⚠️ Текст напоминания пустой.".to_string(),
            StoreError::TextTooLong(max) => {
                format!("⚠️ Текст слишком длинный, максимум {max} символов.")
            }
            StoreError::Io(_) | StoreError::Json(_) => {
                "❌ Не удалось сохранить изменения, попробуйте позже.".to_string()
            }
        }
    }

    fn random_error(error: &RandomError) -> String {
        let reason = match error {
            RandomError::BadDice(expr) => format!("не понимаю «{}», пример: 2d6+1", escape(expr)),
            RandomError::DiceCount => "кубиков должно быть от 1 до 100".to_string(),
            RandomError::Sides => "у кубика от 2 до 1000 граней".to_string(),
            RandomError::Modifier => "модификатор не больше 1000".to_string(),
            RandomError::NotEnoughOptions => {
                "нужно хотя бы два разных варианта: /choose чай | кофе".to_string()
            }
        };
        format!("⚠️ {reason}")
    }

    fn roll(dice: &DiceRoll, outcome: &RollOutcome) -> String {
        if outcome.rolls.len() == 1 && outcome.modifier == 0 {
            return format!("🎲 {dice}: <b>{}</b>", outcome.total);
        }
        let rolls = outcome
            .rolls
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" + ");
        let modifier = match outcome.modifier {
            0 => String::new(),
            m if m > 0 => format!(" (+{m})"),
            m => format!(" ({m})"),
        };
        format!("🎲 {dice}: {rolls}{modifier} = <b>{}</b>", outcome.total)
    }

    fn coin(side: Coin) -> &'static str {
        match side {
            Coin::Heads => "🪙 Орёл",
            Coin::Tails => "🪙 Решка",
        }
    }

    fn chosen(option: &str) -> String {
        format!("🤔 Выбираю: <b>{}</b>", escape(option))
    }

    fn every_usage() -> &'static str {
        "Использование: <code>/every 1d 09:00 текст</code>"
    }

    fn cancel_usage() -> &'static str {
        "Использование: <code>/cancel 12</code> (номер из /list)"
    }

    fn free_text_hint() -> &'static str {
        "Не понял. Напишите, например, <code>напомни через 10м проверить почту</code> или откройте /help."
    }

    fn access_denied() -> &'static str {
        "⛔️ Access denied"
    }

    fn error_message(error: &str) -> String {
        format!("❌ Ошибка: {}", escape(error))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// One cancel button per pending reminder
#[must_use]
pub fn list_keyboard(reminders: &[Reminder]) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = reminders
        .iter()
        .map(|r| {
            InlineKeyboardButton::callback(
                format!("❌ #{}", r.id),
                CallbackAction::Cancel(r.id).encode(),
            )
        })
        .collect();
    InlineKeyboardMarkup::new(
        buttons
            .chunks(CANCEL_BUTTONS_PER_ROW)
            .map(<[InlineKeyboardButton]>::to_vec),
    )
}

/// Snooze presets plus a "done" button under a fired reminder
#[must_use]
pub fn fired_keyboard(id: u64) -> InlineKeyboardMarkup {
    let snoozes = SNOOZE_PRESETS_MINUTES
        .iter()
        .map(|&minutes| {
            InlineKeyboardButton::callback(
                format!("⏰ {}", snooze_label(minutes)),
                CallbackAction::Snooze { id, minutes }.encode(),
            )
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![
        snoozes,
        vec![InlineKeyboardButton::callback(
            "✅ Готово",
            CallbackAction::Done(id).encode(),
        )],
    ])
}

/// Yes / no for `/clear`
#[must_use]
pub fn clear_confirmation_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🗑 Да, удалить", CallbackAction::ClearConfirm.encode()),
        InlineKeyboardButton::callback("Отмена", CallbackAction::ClearAbort.encode()),
    ]])
}

/// Human label for a snooze preset
#[must_use]
pub fn snooze_label(minutes: u32) -> String {
    if minutes % 60 == 0 {
        format!("+{} ч", minutes / 60)
    } else {
        format!("+{minutes} мин")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::when::offset_from_minutes;
    use chrono::TimeZone;
    use teloxide::types::InlineKeyboardButtonKind;

    fn reminder(id: u64, text: &str) -> Reminder {
        let at = Utc
            .with_ymd_and_hms(2026, 6, 1, 7, 30, 0)
            .single()
            .expect("valid timestamp");
        Reminder {
            id,
            chat_id: 1,
            user_id: 1,
            text: text.to_string(),
            due_at: at,
            created_at: at,
            repeat_secs: None,
        }
    }

    fn callback_data(button: &InlineKeyboardButton) -> Option<&str> {
        match &button.kind {
            InlineKeyboardButtonKind::CallbackData(data) => Some(data.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_user_text_is_escaped() {
        let r = reminder(1, "<b>not bold</b> & co");
        let fired = DefaultReminderView::fired(&r);
        assert!(fired.contains("&lt;b&gt;not bold&lt;/b&gt; &amp; co"));

        let listed = DefaultReminderView::reminder_list(&[r], offset_from_minutes(0));
        assert!(!listed.contains("<b>not bold"));
    }

    #[test]
    fn test_list_shows_local_time_and_repeat() {
        let mut r = reminder(4, "yoga");
        r.repeat_secs = Some(86_400);
        let listed = DefaultReminderView::reminder_list(&[r], offset_from_minutes(180));
        assert!(listed.contains("#4"));
        assert!(listed.contains("2026-06-01 10:30"));
        assert!(listed.contains("🔁 1д"));
    }

    #[test]
    fn test_list_keyboard_rows() {
        let reminders: Vec<Reminder> = (1..=9).map(|id| reminder(id, "x")).collect();
        let keyboard = list_keyboard(&reminders);
        assert_eq!(keyboard.inline_keyboard.len(), 3);
        assert_eq!(keyboard.inline_keyboard[0].len(), CANCEL_BUTTONS_PER_ROW);
        assert_eq!(callback_data(&keyboard.inline_keyboard[2][0]), Some("del:9"));
    }

    #[test]
    fn test_fired_keyboard_payloads() {
        let keyboard = fired_keyboard(42);
        let payloads: Vec<&str> = keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(callback_data)
            .collect();
        assert_eq!(payloads, vec!["snooze:42:10", "snooze:42:60", "done:42"]);
    }

    #[test]
    fn test_roll_rendering() {
        let dice = DiceRoll::default();
        let single = RollOutcome {
            rolls: vec![4],
            modifier: 0,
            total: 4,
        };
        assert_eq!(DefaultReminderView::roll(&dice, &single), "🎲 1d6: <b>4</b>");

        let dice = DiceRoll {
            count: 2,
            sides: 6,
            modifier: -1,
        };
        let many = RollOutcome {
            rolls: vec![3, 5],
            modifier: -1,
            total: 7,
        };
        assert_eq!(
            DefaultReminderView::roll(&dice, &many),
            "🎲 2d6-1: 3 + 5 (-1) = <b>7</b>"
        );
    }

    #[test]
    fn test_snooze_labels() {
        assert_eq!(snooze_label(10), "+10 мин");
        assert_eq!(snooze_label(60), "+1 ч");
    }
}
