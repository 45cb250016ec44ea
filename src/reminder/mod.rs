//! Reminder domain: model, time parsing, persistence and delivery loop

/// Reminder records
pub mod model;
/// Background delivery loop
pub mod scheduler;
/// JSON persistence
pub mod store;
/// Time expression parsing
pub mod when;

pub use model::{Reminder, ReminderDraft};
pub use scheduler::{Notifier, Scheduler};
pub use store::{ReminderStore, StoreError};
pub use when::{parse_every, parse_offset, parse_when, Every, When, WhenError};
