use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

/// Represents the current state of the chat dialogue
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    /// No conversation in progress
    #[default]
    Start,
    /// `/remind` without arguments, waiting for a time expression
    AwaitingWhen {
        /// User who started the dialogue
        owner: i64,
    },
    /// Time is known, waiting for the reminder text
    AwaitingText {
        /// User who started the dialogue
        owner: i64,
        /// Due time picked in the previous step
        due_at: DateTime<Utc>,
    },
}

impl State {
    /// User the running dialogue belongs to
    #[must_use]
    pub const fn owner(&self) -> Option<i64> {
        match self {
            Self::Start => None,
            Self::AwaitingWhen { owner } | Self::AwaitingText { owner, .. } => Some(*owner),
        }
    }

    /// Whether a message from `user_id` continues this dialogue.
    ///
    /// Dialogues are stored per chat, so in groups only the user who started
    /// one may answer it.
    #[must_use]
    pub fn accepts(&self, user_id: i64, private_chat: bool) -> bool {
        private_chat || self.owner().is_none_or(|owner| owner == user_id)
    }
}

/// Dialogue handle injected into message handlers
pub type ReminderDialogue = Dialogue<State, InMemStorage<State>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_dialogue_belongs_to_its_owner() {
        let state = State::AwaitingWhen { owner: 7 };
        assert!(state.accepts(7, false));
        assert!(!state.accepts(8, false));

        let state = State::AwaitingText {
            owner: 7,
            due_at: Utc::now(),
        };
        assert_eq!(state.owner(), Some(7));
        assert!(!state.accepts(8, false));
    }

    #[test]
    fn test_private_chat_and_idle_state_accept_anyone() {
        assert!(State::AwaitingWhen { owner: 7 }.accepts(8, true));
        assert!(State::Start.accepts(8, false));
        assert_eq!(State::Start.owner(), None);
    }
}
