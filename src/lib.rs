#![deny(missing_docs)]
//! Telegram reminder bot with a few random-pick utilities.

/// Telegram-specific handlers, views and access control
pub mod bot;
/// Settings and limits
pub mod config;
/// Dice, coin and choice helpers
pub mod random;
/// Reminder model, time parsing, persistence and scheduling
pub mod reminder;
/// Bot runtime entrypoint
pub mod runner;
/// Logging with secret redaction
pub mod telemetry;
/// Text helpers and Telegram retry wrapper
pub mod utils;
