//! End-to-end reminder flow without Telegram: command planning, the JSON
//! store and the scheduler wired to a recording notifier.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tg_reminder_bot::bot::handlers::{
    free_text_request, plan_reminder, plan_repeating, ReminderRequest,
};
use tg_reminder_bot::reminder::when::offset_from_minutes;
use tg_reminder_bot::reminder::{Notifier, Reminder, ReminderDraft, ReminderStore, Scheduler};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recording {
    delivered: Mutex<Vec<Reminder>>,
}

#[async_trait]
impl Notifier for Recording {
    async fn deliver(&self, reminder: &Reminder) -> Result<()> {
        self.delivered.lock().await.push(reminder.clone());
        Ok(())
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn scheduler(store: &Arc<ReminderStore>) -> (Scheduler, Arc<Recording>) {
    let recording = Arc::new(Recording::default());
    let scheduler = Scheduler::new(
        store.clone(),
        recording.clone(),
        std::time::Duration::from_secs(1),
    );
    (scheduler, recording)
}

#[tokio::test]
async fn remind_command_fires_once() -> Result<()> {
    let store = Arc::new(ReminderStore::in_memory());
    let (scheduler, recording) = scheduler(&store);
    let utc = offset_from_minutes(0);

    let request = plan_reminder("15m take the pie out", -42, 7, base(), utc)?;
    let ReminderRequest::Ready(draft) = request else {
        panic!("expected a complete request");
    };
    let reminder = store.add(draft).await?;
    assert_eq!(reminder.due_at, base() + Duration::minutes(15));

    assert_eq!(scheduler.fire_due(base() + Duration::minutes(14)).await, 0);
    assert_eq!(scheduler.fire_due(base() + Duration::minutes(15)).await, 1);
    assert_eq!(scheduler.fire_due(base() + Duration::minutes(30)).await, 0);

    let delivered = recording.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].text, "take the pie out");
    assert_eq!(delivered[0].chat_id, -42);
    assert!(store.list_for_chat(-42).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn every_command_keeps_repeating() -> Result<()> {
    let store = Arc::new(ReminderStore::in_memory());
    let (scheduler, recording) = scheduler(&store);
    let msk = offset_from_minutes(180);

    // 08:00 UTC is 11:00 in UTC+3, so 09:00 local is tomorrow 06:00 UTC
    let draft = plan_repeating("1d 09:00 vitamins", 1, 1, base(), msk)?.expect("has text");
    let reminder = store.add(draft).await?;
    let first = Utc.with_ymd_and_hms(2026, 6, 2, 6, 0, 0).single().expect("valid");
    assert_eq!(reminder.due_at, first);

    assert_eq!(scheduler.fire_due(first).await, 1);
    assert_eq!(scheduler.fire_due(first + Duration::days(1)).await, 1);

    let pending = store.list_for_chat(1).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].due_at, first + Duration::days(2));
    assert_eq!(recording.delivered.lock().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn free_text_then_snooze() -> Result<()> {
    let store = Arc::new(ReminderStore::in_memory());
    let (scheduler, recording) = scheduler(&store);

    let args = free_text_request("напомни через 10 минут выключить плиту").expect("request");
    let request = plan_reminder(args, 3, 3, base(), offset_from_minutes(0))?;
    let ReminderRequest::Ready(draft) = request else {
        panic!("expected a complete request");
    };
    let fired_id = store.add(draft).await?.id;
    let fire_at = base() + Duration::minutes(10);
    assert_eq!(scheduler.fire_due(fire_at).await, 1);

    // Snoozing from another chat is refused
    assert!(store.snooze(4, fired_id, fire_at).await?.is_none());

    let snoozed = store
        .snooze(3, fired_id, fire_at + Duration::minutes(10))
        .await?
        .expect("still in fired history");
    assert_ne!(snoozed.id, fired_id);
    assert_eq!(snoozed.text, "выключить плиту");

    assert_eq!(scheduler.fire_due(fire_at + Duration::minutes(10)).await, 1);
    let delivered = recording.delivered.lock().await;
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].id, snoozed.id);
    Ok(())
}

#[tokio::test]
async fn reminders_survive_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state").join("reminders.json");

    let id = {
        let store = ReminderStore::open(&path).await?;
        store.set_chat_offset(9, 120).await?;
        let due = Utc::now() + Duration::hours(2);
        let request =
            plan_reminder("2h water the plants", 9, 9, Utc::now(), offset_from_minutes(120))?;
        let ReminderRequest::Ready(draft) = request else {
            panic!("expected a complete request");
        };
        let reminder = store.add(draft).await?;
        assert!((reminder.due_at - due).num_seconds().abs() < 5);
        reminder.id
    };

    let reopened = ReminderStore::open(&path).await?;
    let pending = reopened.list_for_chat(9).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(reopened.chat_offset(9).await, Some(120));

    // Ids keep growing after a restart
    let next = reopened
        .add(ReminderDraft::once(
            9,
            9,
            "later",
            Utc::now() + Duration::hours(3),
        ))
        .await?;
    assert!(next.id > id);
    Ok(())
}

#[tokio::test]
async fn running_scheduler_stops_on_cancel() -> Result<()> {
    let store = Arc::new(ReminderStore::in_memory());
    let (scheduler, recording) = scheduler(&store);
    let wake = scheduler.wake_handle();
    let cancel = CancellationToken::new();
    let handle = scheduler.spawn(cancel.clone());

    let started = Utc::now() - Duration::minutes(1);
    let request = plan_reminder("1m ping", 1, 1, started, offset_from_minutes(0))?;
    let ReminderRequest::Ready(draft) = request else {
        panic!("expected a complete request");
    };
    store.add(draft).await?;
    wake.notify_one();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while recording.delivered.lock().await.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await?;

    cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle).await??;
    Ok(())
}
