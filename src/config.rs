//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the bot's limits and timing constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Comma-separated list of allowed user IDs.
    /// Missing or empty means the bot is open to everyone.
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,

    /// Path of the JSON state file
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// UTC offset in minutes for chats that never ran `/tz`
    #[serde(default)]
    pub default_utc_offset: i32,

    /// Scheduler polling period in seconds
    #[serde(default = "default_scheduler_tick_secs")]
    pub scheduler_tick_secs: u64,
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/reminders.json")
}

const fn default_scheduler_tick_secs() -> u64 {
    5
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tg_reminder_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the token is missing.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP_DATA_FILE=/tmp/r.json ./target/app`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables, empty ones treated as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        if settings.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message("TELEGRAM_TOKEN is empty".into()));
        }
        if settings.scheduler_tick_secs == 0 {
            settings.scheduler_tick_secs = 1;
        }
        if settings.default_utc_offset.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::Message(format!(
                "DEFAULT_UTC_OFFSET must be within ±{MAX_UTC_OFFSET_MINUTES} minutes"
            )));
        }

        Ok(settings)
    }

    /// Returns a set of Telegram IDs that are allowed to use the bot
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// Reminder limits
/// Maximum pending reminders per chat
pub const MAX_REMINDERS_PER_CHAT: usize = 100;
/// Maximum reminder text length in characters
pub const MAX_REMINDER_TEXT_CHARS: usize = 1000;
/// How far ahead a reminder may be scheduled
pub const MAX_HORIZON_DAYS: i64 = 366;
/// Shortest accepted `/every` interval
pub const MIN_REPEAT_SECS: u64 = 60;
/// Fired reminders kept for the snooze button
pub const FIRED_HISTORY_LIMIT: usize = 200;
/// Snooze presets offered under a fired reminder, in minutes
pub const SNOOZE_PRESETS_MINUTES: [u32; 2] = [10, 60];
/// Largest accepted UTC offset (14 hours)
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// Telegram API retry configuration
/// Maximum retries for a Telegram API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Longest message part sent in one piece (Telegram allows 4096)
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Cooldown period (seconds) between "Access Denied" messages for same user.
/// Default: 20 minutes.
pub const UNAUTHORIZED_COOLDOWN_SECS: u64 = 1200;
/// Maximum cache capacity (number of entries).
pub const UNAUTHORIZED_CACHE_MAX_SIZE: u64 = 10_000;

/// Get unauthorized cooldown from env or default.
///
/// Environment variable: `UNAUTHORIZED_COOLDOWN_SECS`.
#[must_use]
pub fn get_unauthorized_cooldown() -> u64 {
    env_u64("UNAUTHORIZED_COOLDOWN_SECS", UNAUTHORIZED_COOLDOWN_SECS)
}

/// Get unauthorized cache max size from env or default.
///
/// Environment variable: `UNAUTHORIZED_CACHE_MAX_SIZE`.
#[must_use]
pub fn get_unauthorized_cache_max_size() -> u64 {
    env_u64("UNAUTHORIZED_CACHE_MAX_SIZE", UNAUTHORIZED_CACHE_MAX_SIZE)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
