//! Access control with flood-protected denials
//!
//! Users outside the allow-list get an "Access denied" reply at most once per
//! cooldown; further attempts inside the cooldown are silently counted.

use moka::future::Cache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Allow-list plus a TTL cache of recently denied users
#[derive(Clone)]
pub struct AccessGuard {
    /// Empty means everyone is allowed
    allowed: Arc<HashSet<i64>>,
    /// user_id -> () for users inside their denial cooldown
    denied: Cache<i64, ()>,
    cooldown: Duration,
    silenced_count: Arc<AtomicU64>,
}

impl AccessGuard {
    /// Creates a guard.
    ///
    /// # Arguments
    ///
    /// * `allowed` - Allowed Telegram user IDs; empty opens the bot to everyone
    /// * `cooldown_secs` - Seconds between "Access Denied" messages to the same user
    /// * `max_capacity` - Maximum number of users tracked in the cooldown cache
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashSet;
    /// use tg_reminder_bot::bot::AccessGuard;
    ///
    /// let guard = AccessGuard::new(HashSet::from([42]), 1200, 10_000);
    /// assert!(guard.is_allowed(42));
    /// assert!(!guard.is_allowed(7));
    /// ```
    #[must_use]
    pub fn new(allowed: HashSet<i64>, cooldown_secs: u64, max_capacity: u64) -> Self {
        let cooldown = Duration::from_secs(cooldown_secs);
        let denied = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(cooldown)
            .build();

        Self {
            allowed: Arc::new(allowed),
            denied,
            cooldown,
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the user may talk to the bot
    #[must_use]
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&user_id)
    }

    /// Whether an "Access Denied" reply should go out now.
    ///
    /// Only every 100th silenced attempt is logged.
    pub async fn should_reply_denied(&self, user_id: i64, user_name: &str) -> bool {
        if self.denied.get(&user_id).await.is_none() {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            debug!(
                "⛔️ Silenced {} unauthorized attempts (recent: user {} - {})",
                count, user_id, user_name
            );
        }
        false
    }

    /// Starts the cooldown after a denial was delivered
    pub async fn mark_denied(&self, user_id: i64) {
        self.denied.insert(user_id, ()).await;
    }

    /// Total attempts silenced by the cooldown
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }

    /// Configured cooldown
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
