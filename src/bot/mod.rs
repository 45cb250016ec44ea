/// Allow-list and "access denied" flood protection
pub mod access;
/// Inline keyboard callback payloads
pub mod callback;
/// Handlers for inline keyboard presses
pub mod callback_handlers;
/// Command, dialogue and free-text handlers
pub mod handlers;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// User state and dialogue management
pub mod state;
/// View layer for UI components (keyboards, messages)
pub mod views;

pub use access::AccessGuard;
pub use handlers::BotContext;
