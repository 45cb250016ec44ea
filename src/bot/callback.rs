//! Inline keyboard callback payloads.
//!
//! Telegram limits callback data to 64 bytes, so payloads are short
//! `verb:arg` strings.

/// Action carried by an inline keyboard button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Cancel a pending reminder from the `/list` keyboard
    Cancel(u64),
    /// Re-schedule a fired reminder
    Snooze {
        /// Fired reminder id
        id: u64,
        /// Delay from now
        minutes: u32,
    },
    /// Dismiss the buttons under a fired reminder
    Done(u64),
    /// Confirm `/clear`
    ClearConfirm,
    /// Abort `/clear`
    ClearAbort,
}

/// Longest snooze a button may carry (one day)
const MAX_SNOOZE_MINUTES: u32 = 24 * 60;

impl CallbackAction {
    /// Serialize into callback data
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Cancel(id) => format!("del:{id}"),
            Self::Snooze { id, minutes } => format!("snooze:{id}:{minutes}"),
            Self::Done(id) => format!("done:{id}"),
            Self::ClearConfirm => "clear:yes".to_string(),
            Self::ClearAbort => "clear:no".to_string(),
        }
    }

    /// Parse callback data; unknown or malformed payloads give `None`
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let verb = parts.next()?;
        let action = match verb {
            "del" => Self::Cancel(parts.next()?.parse().ok()?),
            "done" => Self::Done(parts.next()?.parse().ok()?),
            "snooze" => {
                let id = parts.next()?.parse().ok()?;
                let minutes: u32 = parts.next()?.parse().ok()?;
                if minutes == 0 || minutes > MAX_SNOOZE_MINUTES {
                    return None;
                }
                Self::Snooze { id, minutes }
            }
            "clear" => match parts.next()? {
                "yes" => Self::ClearConfirm,
                "no" => Self::ClearAbort,
                _ => return None,
            },
            _ => return None,
        };
        // Trailing segments mean a payload from some other keyboard
        if parts.next().is_some() {
            return None;
        }
        Some(action)
    }
}
