//! Turn assembler: pairs user messages with the assistant reply that follows.

use chrono::{DateTime, Utc};

use super::{Message, Role, sanitize_user_message};
use crate::model::Turn;

/// Build numbered turns from an ordered message list.
///
/// Each user message opens a turn; an assistant message directly after it is
/// attached as the reply. Turns whose user text is empty after sanitizing are
/// dropped, and ids are assigned to the surviving turns so they stay 1-based
/// and gapless. Snapshots carry no per-message times, so every turn gets the
/// snapshot's `timestamp`.
pub fn assemble_turns(messages: &[Message], timestamp: DateTime<Utc>) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let message = &messages[i];
        i += 1;

        if message.role != Role::User {
            continue;
        }

        let assistant_message = match messages.get(i) {
            Some(next) if next.role == Role::Assistant => {
                i += 1;
                Some(next.content.clone())
            }
            _ => None,
        };

        let user_message = sanitize_user_message(&message.content);
        if user_message.trim().is_empty() {
            continue;
        }

        turns.push(Turn {
            turn_id: turns.len() as u32 + 1,
            user_message,
            assistant_message,
            timestamp,
        });
    }

    turns
}
