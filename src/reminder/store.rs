//! JSON-file persistence for reminders and per-chat settings
//!
//! The whole state is one small JSON document. Every mutation is applied to
//! a copy, written to `<file>.tmp` and renamed over the original before the
//! in-memory state is replaced, so a failed write leaves both untouched.

use super::model::{Reminder, ReminderDraft};
use crate::config::{FIRED_HISTORY_LIMIT, MAX_REMINDERS_PER_CHAT, MAX_REMINDER_TEXT_CHARS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistence and validation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the state file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The state file is not valid JSON for this schema
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The chat already has the maximum number of pending reminders
    #[error("reminder limit of {0} per chat reached")]
    LimitReached(usize),
    /// Reminder text is blank
    #[error("reminder text is empty")]
    EmptyText,
    /// Reminder text is longer than allowed
    #[error("reminder text exceeds {0} characters")]
    TextTooLong(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    #[serde(default = "first_id")]
    next_id: u64,
    #[serde(default)]
    reminders: Vec<Reminder>,
    #[serde(default)]
    fired: VecDeque<Reminder>,
    #[serde(default)]
    chat_offsets: HashMap<i64, i32>,
}

const fn first_id() -> u64 {
    1
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            next_id: first_id(),
            reminders: Vec::new(),
            fired: VecDeque::new(),
            chat_offsets: HashMap::new(),
        }
    }
}

impl StoreState {
    fn insert(&mut self, draft: ReminderDraft) -> Result<Reminder, StoreError> {
        let text = draft.text.trim();
        if text.is_empty() {
            return Err(StoreError::EmptyText);
        }
        if text.chars().count() > MAX_REMINDER_TEXT_CHARS {
            return Err(StoreError::TextTooLong(MAX_REMINDER_TEXT_CHARS));
        }
        let pending = self
            .reminders
            .iter()
            .filter(|r| r.chat_id == draft.chat_id)
            .count();
        if pending >= MAX_REMINDERS_PER_CHAT {
            return Err(StoreError::LimitReached(MAX_REMINDERS_PER_CHAT));
        }

        let reminder = Reminder {
            id: self.next_id,
            chat_id: draft.chat_id,
            user_id: draft.user_id,
            text: text.to_string(),
            due_at: draft.due_at,
            created_at: Utc::now(),
            repeat_secs: draft.repeat_secs,
        };
        self.next_id += 1;
        self.reminders.push(reminder.clone());
        Ok(reminder)
    }

    fn fired(&self, chat_id: i64, id: u64) -> Option<&Reminder> {
        self.fired
            .iter()
            .rev()
            .find(|r| r.id == id && r.chat_id == chat_id)
    }

    fn remember_fired(&mut self, reminder: Reminder) {
        self.fired.push_back(reminder);
        while self.fired.len() > FIRED_HISTORY_LIMIT {
            self.fired.pop_front();
        }
    }
}

fn sort_by_due(reminders: &mut [Reminder]) {
    reminders.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.id.cmp(&b.id)));
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Reminder storage shared between handlers and the scheduler
pub struct ReminderStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl ReminderStore {
    /// Open the store backed by `path`.
    ///
    /// A missing or blank file starts an empty store; the file and its parent
    /// directory are created on the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    /// A corrupt file is never overwritten.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => StoreState::default(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            pending = state.reminders.len(),
            "Reminder store opened"
        );

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Store without a backing file
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_string_pretty(state)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Reminder store saved");
        Ok(())
    }

    async fn commit(&self, current: &mut StoreState, next: StoreState) -> Result<(), StoreError> {
        self.persist(&next).await?;
        *current = next;
        Ok(())
    }

    /// Validate and store a new reminder, assigning it the next id.
    ///
    /// # Errors
    ///
    /// Returns an error for blank or oversized text, a full chat, or a failed write.
    pub async fn add(&self, draft: ReminderDraft) -> Result<Reminder, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let reminder = next.insert(draft)?;
        self.commit(&mut state, next).await?;

        info!(
            id = reminder.id,
            chat_id = reminder.chat_id,
            due_at = %reminder.due_at,
            repeating = reminder.repeat_secs.is_some(),
            "Reminder scheduled"
        );
        Ok(reminder)
    }

    /// Pending reminders of a chat, soonest first
    pub async fn list_for_chat(&self, chat_id: i64) -> Vec<Reminder> {
        let state = self.state.lock().await;
        let mut list: Vec<Reminder> = state
            .reminders
            .iter()
            .filter(|r| r.chat_id == chat_id)
            .cloned()
            .collect();
        sort_by_due(&mut list);
        list
    }

    /// Remove a reminder, but only from the chat that owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub async fn cancel(&self, chat_id: i64, id: u64) -> Result<Option<Reminder>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state
            .reminders
            .iter()
            .position(|r| r.id == id && r.chat_id == chat_id)
        else {
            return Ok(None);
        };

        let mut next = state.clone();
        let removed = next.reminders.remove(pos);
        self.commit(&mut state, next).await?;
        info!(id, chat_id, "Reminder cancelled");
        Ok(Some(removed))
    }

    /// Remove every pending reminder of a chat, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub async fn clear_chat(&self, chat_id: i64) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.reminders.len();
        let mut next = state.clone();
        next.reminders.retain(|r| r.chat_id != chat_id);
        let removed = before - next.reminders.len();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(&mut state, next).await?;
        info!(chat_id, removed, "Chat reminders cleared");
        Ok(removed)
    }

    /// Take every reminder due at `now`.
    ///
    /// One-shot reminders are removed, repeating ones move to their next
    /// occurrence. Each returned reminder is also kept in the fired history.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written; nothing is taken then.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let mut state = self.state.lock().await;
        if !state.reminders.iter().any(|r| r.is_due(now)) {
            return Ok(Vec::new());
        }

        let mut next = state.clone();
        let mut due = Vec::new();
        let mut kept = Vec::with_capacity(next.reminders.len());
        for mut reminder in std::mem::take(&mut next.reminders) {
            if !reminder.is_due(now) {
                kept.push(reminder);
                continue;
            }
            due.push(reminder.clone());
            if let Some(next_due) = reminder.next_occurrence(now) {
                reminder.due_at = next_due;
                kept.push(reminder);
            }
        }
        next.reminders = kept;
        sort_by_due(&mut due);
        for reminder in &due {
            next.remember_fired(reminder.clone());
        }

        self.commit(&mut state, next).await?;
        Ok(due)
    }

    /// Earliest pending due time
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.reminders.iter().map(|r| r.due_at).min()
    }

    /// Fired reminder `id` of a chat, while it is still in the fired history
    pub async fn find_fired(&self, chat_id: i64, id: u64) -> Option<Reminder> {
        self.state.lock().await.fired(chat_id, id).cloned()
    }

    /// Re-schedule the text of a fired reminder as a new one-shot reminder.
    ///
    /// Returns `None` when the reminder is no longer in the fired history or
    /// belongs to another chat.
    ///
    /// # Errors
    ///
    /// Returns an error on a full chat or a failed write.
    pub async fn snooze(
        &self,
        chat_id: i64,
        fired_id: u64,
        due_at: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(original) = state.fired(chat_id, fired_id).cloned() else {
            return Ok(None);
        };

        let mut next = state.clone();
        let reminder = next.insert(ReminderDraft::once(
            original.chat_id,
            original.user_id,
            original.text,
            due_at,
        ))?;
        self.commit(&mut state, next).await?;
        info!(from = fired_id, id = reminder.id, due_at = %due_at, "Reminder snoozed");
        Ok(Some(reminder))
    }

    /// UTC offset in minutes set with `/tz`, if any
    pub async fn chat_offset(&self, chat_id: i64) -> Option<i32> {
        let state = self.state.lock().await;
        state.chat_offsets.get(&chat_id).copied()
    }

    /// Remember a chat's UTC offset in minutes.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub async fn set_chat_offset(&self, chat_id: i64, minutes: i32) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.chat_offsets.insert(chat_id, minutes);
        self.commit(&mut state, next).await
    }

    /// Pending reminders across all chats
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.reminders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn draft(chat_id: i64, text: &str, minutes: i64) -> ReminderDraft {
        ReminderDraft::once(chat_id, 7, text, t0() + Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_never_reused() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        let a = store.add(draft(1, "a", 5)).await?;
        let b = store.add(draft(1, "b", 5)).await?;
        store.cancel(1, b.id).await?;
        let c = store.add(draft(1, "c", 5)).await?;

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(c.id, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_text_validation() {
        let store = ReminderStore::in_memory();
        assert!(matches!(
            store.add(draft(1, "   ", 5)).await,
            Err(StoreError::EmptyText)
        ));
        let long = "x".repeat(MAX_REMINDER_TEXT_CHARS + 1);
        assert!(matches!(
            store.add(draft(1, &long, 5)).await,
            Err(StoreError::TextTooLong(_))
        ));
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_text_is_trimmed() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        let r = store.add(draft(1, "  feed the cat \n", 5)).await?;
        assert_eq!(r.text, "feed the cat");
        Ok(())
    }

    #[tokio::test]
    async fn test_per_chat_limit() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        for i in 0..MAX_REMINDERS_PER_CHAT {
            store.add(draft(1, &format!("r{i}"), 5)).await?;
        }
        assert!(matches!(
            store.add(draft(1, "one more", 5)).await,
            Err(StoreError::LimitReached(_))
        ));
        // Another chat is unaffected
        store.add(draft(2, "other chat", 5)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_list_sorted_and_scoped() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        store.add(draft(1, "late", 30)).await?;
        store.add(draft(1, "early", 10)).await?;
        store.add(draft(2, "foreign", 1)).await?;

        let texts: Vec<String> = store
            .list_for_chat(1)
            .await
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["early", "late"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_only_in_owning_chat() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        let r = store.add(draft(1, "mine", 10)).await?;

        assert!(store.cancel(2, r.id).await?.is_none());
        assert_eq!(store.pending_count().await, 1);
        assert_eq!(store.cancel(1, r.id).await?.map(|r| r.text), Some("mine".into()));
        assert!(store.cancel(1, r.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_chat() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        store.add(draft(1, "a", 10)).await?;
        store.add(draft(1, "b", 10)).await?;
        store.add(draft(2, "c", 10)).await?;

        assert_eq!(store.clear_chat(1).await?, 2);
        assert_eq!(store.clear_chat(1).await?, 0);
        assert_eq!(store.pending_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_take_due_removes_one_shots_and_reschedules_repeats() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        store.add(draft(1, "later", 60)).await?;
        store.add(draft(1, "second", 10)).await?;
        store.add(draft(1, "first", 5)).await?;
        store
            .add(ReminderDraft::repeating(1, 7, "hourly", t0() + Duration::minutes(1), 3600))
            .await?;

        let due = store.take_due(t0() + Duration::minutes(15)).await?;
        let texts: Vec<&str> = due.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["hourly", "first", "second"]);

        let left = store.list_for_chat(1).await;
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].text, "later");
        assert_eq!(left[1].text, "hourly");
        assert_eq!(left[1].due_at, t0() + Duration::minutes(61));

        assert!(store.take_due(t0() + Duration::minutes(15)).await?.is_empty());
        assert_eq!(store.next_due().await, Some(t0() + Duration::minutes(60)));
        Ok(())
    }

    #[tokio::test]
    async fn test_fired_history_and_snooze() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        let r = store.add(draft(1, "stretch", 1)).await?;
        store.take_due(t0() + Duration::minutes(2)).await?;

        assert!(store.snooze(2, r.id, t0()).await?.is_none());

        let snoozed = store
            .snooze(1, r.id, t0() + Duration::minutes(12))
            .await?
            .expect("fired reminder is known");
        assert_ne!(snoozed.id, r.id);
        assert_eq!(snoozed.text, "stretch");
        assert_eq!(snoozed.repeat_secs, None);
        assert_eq!(store.pending_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_fired_history_is_bounded() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        let first = store.add(draft(1, "first", 0)).await?;
        store.take_due(t0()).await?;
        for i in 0..FIRED_HISTORY_LIMIT {
            store.add(draft(2 + i64::try_from(i).unwrap_or(0), "x", 0)).await?;
        }
        store.take_due(t0()).await?;

        // Pushed out of the history, so it can no longer be snoozed
        assert!(store.find_fired(1, first.id).await.is_none());
        assert!(store.snooze(1, first.id, t0()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_find_fired() -> Result<(), StoreError> {
        let store = ReminderStore::in_memory();
        let r = store.add(draft(1, "tea", 1)).await?;
        assert!(store.find_fired(1, r.id).await.is_none());

        store.take_due(t0() + Duration::minutes(1)).await?;
        let fired = store.find_fired(1, r.id).await.expect("in fired history");
        assert_eq!(fired.text, "tea");
        assert_eq!(fired.due_at, t0() + Duration::minutes(1));
        // Scoped to the owning chat
        assert!(store.find_fired(2, r.id).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reminders.json");
        let store = ReminderStore::open(&path).await?;
        store.add(draft(1, "kept", 5)).await?;
        let on_disk = std::fs::read_to_string(&path)?;
        let before = store.list_for_chat(1).await;

        // A directory in place of the temp file makes every write fail
        std::fs::create_dir(tmp_path(&path))?;

        assert!(matches!(
            store.add(draft(1, "lost", 10)).await,
            Err(StoreError::Io(_))
        ));
        assert!(matches!(
            store.take_due(t0() + Duration::minutes(30)).await,
            Err(StoreError::Io(_))
        ));
        assert!(matches!(
            store.set_chat_offset(1, 60).await,
            Err(StoreError::Io(_))
        ));

        assert_eq!(store.pending_count().await, 1);
        assert_eq!(store.list_for_chat(1).await, before);
        assert!(store.find_fired(1, before[0].id).await.is_none());
        assert_eq!(store.chat_offset(1).await, None);
        assert_eq!(std::fs::read_to_string(&path)?, on_disk);

        // Once writes work again the next id is the one that failed
        std::fs::remove_dir(tmp_path(&path))?;
        assert_eq!(store.add(draft(1, "saved", 10)).await?.id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_persists_across_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("reminders.json");

        {
            let store = ReminderStore::open(&path).await?;
            store.add(draft(1, "survive restart", 10)).await?;
            store.set_chat_offset(1, 180).await?;
        }

        let store = ReminderStore::open(&path).await?;
        let list = store.list_for_chat(1).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].text, "survive restart");
        assert_eq!(store.chat_offset(1).await, Some(180));
        assert_eq!(store.chat_offset(2).await, None);
        assert!(!tmp_path(&path).exists());

        // Ids continue after a restart
        let r = store.add(draft(1, "next", 10)).await?;
        assert_eq!(r.id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected_and_kept() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reminders.json");
        std::fs::write(&path, "{ not json")?;

        assert!(matches!(
            ReminderStore::open(&path).await,
            Err(StoreError::Json(_))
        ));
        assert_eq!(std::fs::read_to_string(&path)?, "{ not json");
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_file_opens_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reminders.json");
        std::fs::write(&path, "\n")?;

        let store = ReminderStore::open(&path).await?;
        assert_eq!(store.pending_count().await, 0);
        Ok(())
    }
}
