//! Telegram views: texts and keyboards

mod reminder;

pub use reminder::{
    clear_confirmation_keyboard, fired_keyboard, list_keyboard, snooze_label, DefaultReminderView,
    ReminderView,
};
