//! One sync run: agents, then sessions, then transcripts.
//!
//! Failures are contained at the smallest unit that can fail: a session
//! problem is logged and counted, an agent problem moves on to the next
//! agent. Only a failure to list agents at all fails the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::converge::{ConvergeOutcome, converge};
use super::fetch::{FetchOptions, fetch_agent_snapshots, list_all_agents, list_recent_sessions};
use super::logs::{LogSyncReport, sync_raw_logs};
use super::selector::{RawContextSnapshot, SessionContextSelector};
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::model::{Agent, Session, canonical_session_id};
use crate::store::Database;
use crate::transcript::{assemble_turns, parse_messages};
use crate::upstream::UpstreamApi;

/// Counters for one run, logged when it ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub agents: usize,
    pub sessions: usize,
    pub snapshots: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Agents or sessions that failed and were passed over.
    pub failed: usize,
}

/// Clears the running flag when dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> std::result::Result<Self, SyncError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunGuard(flag))
            .map_err(|_| SyncError::AlreadyRunning)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives sync runs against one upstream and one store.
pub struct SyncRunner {
    api: Arc<dyn UpstreamApi>,
    db: Arc<dyn Database>,
    settings: SyncSettings,
    running: AtomicBool,
}

impl SyncRunner {
    pub fn new(api: Arc<dyn UpstreamApi>, db: Arc<dyn Database>, settings: SyncSettings) -> Self {
        Self {
            api,
            db,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Run one full transcript sync.
    ///
    /// Returns `SyncError::AlreadyRunning` if another run holds this runner.
    pub async fn run_once(&self) -> Result<RunReport> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started = Instant::now();
        let horizon = self.settings.horizon.resolve(Utc::now());
        info!(horizon = %horizon, "Sync run started");

        let mut report = RunReport::default();
        let agents = self.sync_agents(&mut report).await?;

        for agent in &agents {
            if let Err(e) = self.sync_agent(agent, horizon, &mut report).await {
                let failure = SyncError::AgentFailed {
                    agent: agent.name.clone(),
                    reason: e.to_string(),
                };
                error!(error = %failure, "Skipping agent");
                report.failed += 1;
            }
        }

        info!(
            agents = report.agents,
            sessions = report.sessions,
            snapshots = report.snapshots,
            written = report.written,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync run finished"
        );
        Ok(report)
    }

    /// Run one raw log sync. Shares the running flag with `run_once`.
    pub async fn run_logs(&self) -> Result<LogSyncReport> {
        let _guard = RunGuard::acquire(&self.running)?;
        let horizon = self.settings.horizon.resolve(Utc::now());
        sync_raw_logs(self.api.as_ref(), self.db.as_ref(), &self.settings, horizon).await
    }

    /// List every agent and refresh its record.
    ///
    /// A failed store write is counted and the agent is still synced.
    async fn sync_agents(&self, report: &mut RunReport) -> Result<Vec<Agent>> {
        let agents =
            list_all_agents(self.api.as_ref(), self.settings.page_size, self.settings.page_delay)
                .await?;
        report.agents = agents.len();
        for agent in &agents {
            if let Err(e) = self.db.upsert_agent(agent).await {
                warn!(agent = %agent.name, error = %e, "Failed to store agent");
                report.failed += 1;
            }
        }
        debug!(count = agents.len(), "Agents refreshed");
        Ok(agents)
    }

    async fn sync_agent(
        &self,
        agent: &Agent,
        horizon: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        self.sync_sessions(agent, horizon, report).await?;

        let options = FetchOptions {
            page_size: self.settings.page_size,
            page_delay: self.settings.page_delay,
            horizon,
            query: Some(self.settings.log_query.clone()),
        };
        let mut selector = SessionContextSelector::new();
        let fetched =
            fetch_agent_snapshots(self.api.as_ref(), &agent.name, &options, &mut selector).await?;
        if fetched.discarded > 0 {
            warn!(
                agent = %agent.name,
                discarded = fetched.discarded,
                "Snapshots without a session id were dropped"
            );
        }

        let snapshots = selector.into_snapshots();
        report.snapshots += snapshots.len();
        for snapshot in &snapshots {
            self.converge_snapshot(agent, snapshot, report).await;
        }
        Ok(())
    }

    async fn sync_sessions(
        &self,
        agent: &Agent,
        horizon: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        let sessions = list_recent_sessions(
            self.api.as_ref(),
            &agent.name,
            self.settings.page_size,
            self.settings.page_delay,
            horizon,
        )
        .await?;

        for upstream in sessions {
            let session = Session {
                session_id: canonical_session_id(&upstream.session_id),
                agent_id: agent.agent_id.clone(),
                agent_name: agent.name.clone(),
                started_at: upstream.started_at,
                ended_at: upstream.ended_at,
                status: upstream.status,
            };
            match self.db.upsert_session(&session).await {
                Ok(()) => report.sessions += 1,
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Failed to store session");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn converge_snapshot(
        &self,
        agent: &Agent,
        snapshot: &RawContextSnapshot,
        report: &mut RunReport,
    ) {
        let messages = parse_messages(&snapshot.log_text);
        if messages.is_empty() {
            warn!(
                session_id = %snapshot.session_id,
                "Snapshot yielded no messages, skipping session"
            );
            report.skipped += 1;
            return;
        }

        let turns = assemble_turns(&messages, snapshot.timestamp);
        match converge(self.db.as_ref(), agent, snapshot, turns).await {
            Ok(ConvergeOutcome::Written) => report.written += 1,
            Ok(ConvergeOutcome::Unchanged) => report.unchanged += 1,
            Ok(ConvergeOutcome::Skipped(reason)) => {
                debug!(session_id = %snapshot.session_id, ?reason, "Conversation skipped");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(session_id = %snapshot.session_id, error = %e, "Failed to store conversation");
                report.failed += 1;
            }
        }
    }
}
