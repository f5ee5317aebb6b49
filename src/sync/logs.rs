//! Raw log sync: copies every log line of recent sessions into `raw_logs`.
//!
//! Sessions are processed in fixed-size batches that run concurrently, with a
//! pause between batches to stay under the platform's rate limits.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fetch::{list_all_agents, list_recent_sessions, paginate};
use crate::config::SyncSettings;
use crate::error::Result;
use crate::model::{LogRecord, canonical_session_id};
use crate::store::Database;
use crate::upstream::{LogEntry, UpstreamApi};

/// Counters for one raw log sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSyncReport {
    pub agents: usize,
    pub sessions: usize,
    pub logs: usize,
    /// Agents or sessions that failed and were passed over.
    pub failed: usize,
}

/// Stable key for a log line: the upstream id, or a UUIDv5 of its content.
pub fn log_key(session_id: &str, entry: &LogEntry) -> String {
    match &entry.id {
        Some(id) => id.clone(),
        None => {
            let name = format!(
                "{session_id}\n{}\n{}",
                entry.timestamp.to_rfc3339(),
                entry.message
            );
            Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
        }
    }
}

pub async fn sync_raw_logs(
    api: &dyn UpstreamApi,
    db: &dyn Database,
    settings: &SyncSettings,
    horizon: DateTime<Utc>,
) -> Result<LogSyncReport> {
    let started = Instant::now();
    let agents = list_all_agents(api, settings.page_size, settings.page_delay).await?;
    let mut report = LogSyncReport {
        agents: agents.len(),
        ..Default::default()
    };

    for agent in &agents {
        let sessions = match list_recent_sessions(
            api,
            &agent.name,
            settings.page_size,
            settings.page_delay,
            horizon,
        )
        .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "Failed to list sessions");
                report.failed += 1;
                continue;
            }
        };

        let batches: Vec<_> = sessions.chunks(settings.batch_size.max(1)).collect();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !settings.batch_pause.is_zero() {
                tokio::time::sleep(settings.batch_pause).await;
            }

            let results = join_all(batch.iter().map(|session| {
                sync_session_logs(api, db, settings, &agent.name, &session.session_id)
            }))
            .await;

            for (session, result) in batch.iter().zip(results) {
                match result {
                    Ok(count) => {
                        report.sessions += 1;
                        report.logs += count;
                    }
                    Err(e) => {
                        warn!(
                            agent = %agent.name,
                            session_id = %session.session_id,
                            error = %e,
                            "Raw log sync failed for session"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
    }

    info!(
        agents = report.agents,
        sessions = report.sessions,
        logs = report.logs,
        failed = report.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Raw log sync finished"
    );
    Ok(report)
}

/// Page through one session's logs and upsert each line.
async fn sync_session_logs(
    api: &dyn UpstreamApi,
    db: &dyn Database,
    settings: &SyncSettings,
    agent_name: &str,
    session_id: &str,
) -> Result<usize> {
    let pages = paginate(settings.page_size, settings.page_delay, |page| {
        api.list_logs(agent_name, Some(session_id), page, settings.page_size, None)
    });
    let mut pages = std::pin::pin!(pages);
    let mut stored = 0;
    let stored_id = canonical_session_id(session_id);

    while let Some(page) = pages.try_next().await? {
        for entry in page.items {
            let record = LogRecord {
                log_key: log_key(&stored_id, &entry),
                session_id: Some(
                    entry
                        .session_id
                        .as_deref()
                        .map_or_else(|| stored_id.clone(), canonical_session_id),
                ),
                agent_name: agent_name.to_string(),
                message: entry.message,
                timestamp: entry.timestamp,
                raw: entry.raw,
            };
            db.upsert_log(&record).await?;
            stored += 1;
        }
    }

    debug!(agent = agent_name, session_id, stored, "Session logs stored");
    Ok(stored)
}
