use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled reminder as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Store-wide id, never reused
    pub id: u64,
    /// Chat the reminder is delivered to
    pub chat_id: i64,
    /// User who created it
    pub user_id: i64,
    /// Reminder text as typed by the user
    pub text: String,
    /// Next delivery time
    pub due_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Repeat interval in seconds for `/every` reminders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_secs: Option<u64>,
}

/// A reminder that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderDraft {
    /// Target chat
    pub chat_id: i64,
    /// Author
    pub user_id: i64,
    /// Text
    pub text: String,
    /// First delivery time
    pub due_at: DateTime<Utc>,
    /// Repeat interval in seconds
    pub repeat_secs: Option<u64>,
}

impl ReminderDraft {
    /// One-shot draft
    #[must_use]
    pub fn once(chat_id: i64, user_id: i64, text: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            chat_id,
            user_id,
            text: text.into(),
            due_at,
            repeat_secs: None,
        }
    }

    /// Repeating draft
    #[must_use]
    pub fn repeating(
        chat_id: i64,
        user_id: i64,
        text: impl Into<String>,
        due_at: DateTime<Utc>,
        every_secs: u64,
    ) -> Self {
        Self {
            repeat_secs: Some(every_secs),
            ..Self::once(chat_id, user_id, text, due_at)
        }
    }
}

impl Reminder {
    /// Whether the reminder should fire at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }

    /// Next due time of a repeating reminder strictly after `now`.
    ///
    /// Periods missed while the bot was down are skipped rather than replayed.
    /// Returns `None` for one-shot reminders.
    #[must_use]
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = i64::try_from(self.repeat_secs?).ok().filter(|s| *s > 0)?;
        if self.due_at > now {
            return Some(self.due_at);
        }
        let behind = (now - self.due_at).num_seconds();
        let periods = behind / step + 1;
        let advance = periods.checked_mul(step)?;
        Duration::try_seconds(advance).map(|d| self.due_at + d)
    }
}
