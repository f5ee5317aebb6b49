//! Convergence engine: turns a selected snapshot into a persisted conversation.
//!
//! Writes are skipped when the stored transcript is already at least as new
//! and has the same number of turns, so repeating a run costs no writes.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::selector::RawContextSnapshot;
use crate::error::DatabaseError;
use crate::model::{Agent, Conversation, Turn};
use crate::store::Database;

/// Why a snapshot produced no write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The session record has not been synced yet.
    MissingParent,
    NoTurns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeOutcome {
    Written,
    Unchanged,
    Skipped(SkipReason),
}

/// Persist `turns` for the snapshot's session if they change anything.
pub async fn converge(
    db: &dyn Database,
    agent: &Agent,
    snapshot: &RawContextSnapshot,
    turns: Vec<Turn>,
) -> Result<ConvergeOutcome, DatabaseError> {
    if turns.is_empty() {
        return Ok(ConvergeOutcome::Skipped(SkipReason::NoTurns));
    }

    let Some(session) = db.find_session(&snapshot.session_id).await? else {
        debug!(session_id = %snapshot.session_id, "No parent session, skipping");
        return Ok(ConvergeOutcome::Skipped(SkipReason::MissingParent));
    };

    let total_turns = turns.len() as u32;
    let existing = db.find_conversation(&snapshot.session_id).await?;

    if let Some(existing) = &existing {
        if existing.total_turns == total_turns && existing.last_message_at >= snapshot.timestamp {
            return Ok(ConvergeOutcome::Unchanged);
        }
    }

    let first_message_at = earliest([
        existing.as_ref().map(|c| c.first_message_at),
        session.started_at,
        Some(snapshot.timestamp),
    ])
    .unwrap_or(snapshot.timestamp);

    let conversation = Conversation {
        session_id: snapshot.session_id.clone(),
        agent_id: agent.agent_id.clone(),
        agent_name: agent.name.clone(),
        turns,
        total_turns,
        first_message_at,
        last_message_at: snapshot.timestamp,
    };
    db.upsert_conversation(&conversation).await?;

    debug!(
        session_id = %conversation.session_id,
        turns = total_turns,
        "Conversation written"
    );
    Ok(ConvergeOutcome::Written)
}

fn earliest<const N: usize>(candidates: [Option<DateTime<Utc>>; N]) -> Option<DateTime<Utc>> {
    candidates.into_iter().flatten().min()
}
