//! Background delivery of due reminders
//!
//! A single tokio task sleeps until the earliest due reminder (bounded by the
//! tick), takes everything due from the store and hands it to a [`Notifier`].
//! Handlers signal the wake handle after adding a reminder so an early due
//! time is not delayed by a full tick.

use super::model::Reminder;
use super::store::ReminderStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivers a fired reminder to its chat
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one reminder
    async fn deliver(&self, reminder: &Reminder) -> Result<()>;
}

/// Reminder scheduler loop
pub struct Scheduler {
    store: Arc<ReminderStore>,
    notifier: Arc<dyn Notifier>,
    tick: Duration,
    wake: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler polling at least every `tick`
    #[must_use]
    pub fn new(store: Arc<ReminderStore>, notifier: Arc<dyn Notifier>, tick: Duration) -> Self {
        Self {
            store,
            notifier,
            tick,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle to wake the loop early, e.g. after a reminder was added
    #[must_use]
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Deliver everything due at `now`.
    ///
    /// Returns the number of reminders delivered successfully. A failed
    /// delivery is logged and does not block the rest.
    pub async fn fire_due(&self, now: chrono::DateTime<Utc>) -> usize {
        self.deliver_due(now).await.unwrap_or(0)
    }

    /// `None` when the store could not take the due reminders
    async fn deliver_due(&self, now: chrono::DateTime<Utc>) -> Option<usize> {
        let due = match self.store.take_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to take due reminders");
                return None;
            }
        };

        let mut delivered = 0;
        for reminder in &due {
            match self.notifier.deliver(reminder).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(id = reminder.id, chat_id = reminder.chat_id, "Reminder delivered");
                }
                Err(e) => {
                    warn!(
                        id = reminder.id,
                        chat_id = reminder.chat_id,
                        error = %e,
                        "Failed to deliver reminder"
                    );
                }
            }
        }
        Some(delivered)
    }

    async fn sleep_duration(&self) -> Duration {
        let Some(next_due) = self.store.next_due().await else {
            return self.tick;
        };
        (next_due - Utc::now())
            .to_std()
            .map_or(Duration::ZERO, |left| left.min(self.tick))
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!(tick_secs = self.tick.as_secs_f64(), "Reminder scheduler started");

        let mut store_failed = false;
        loop {
            // An unwritable store keeps the overdue reminder, so wait a full tick
            let pause = if store_failed {
                self.tick
            } else {
                self.sleep_duration().await
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.wake.notified() => {}
                () = tokio::time::sleep(pause) => {}
            }
            store_failed = self.deliver_due(Utc::now()).await.is_none();
        }

        info!("Reminder scheduler stopped");
    }

    /// Run on a tokio task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
