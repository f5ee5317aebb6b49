//! Scripted upstream used by the sync unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::UpstreamError;
use crate::model::Agent;
use crate::upstream::{LogEntry, Page, UpstreamApi, UpstreamSession};

/// Deterministic session id for fixture number `n`.
pub(crate) fn sid(n: u32) -> String {
    format!("00000000-0000-4000-8000-{n:012x}")
}

pub(crate) fn log_entry(message: &str, timestamp: DateTime<Utc>) -> LogEntry {
    LogEntry {
        id: None,
        session_id: None,
        message: message.to_string(),
        timestamp,
        raw: serde_json::json!({ "message": message }),
    }
}

fn server_error(endpoint: &str) -> UpstreamError {
    UpstreamError::Http {
        endpoint: endpoint.to_string(),
        status: 500,
        body: "scripted failure".into(),
    }
}

/// Serve `items` in `limit`-sized slices.
fn slice_page<T: Clone>(items: &[T], page: u32, limit: u32) -> Page<T> {
    let start = (page.saturating_sub(1) * limit) as usize;
    let end = (start + limit as usize).min(items.len());
    let slice = items.get(start..end).unwrap_or_default().to_vec();
    Page::new(slice, Some(end < items.len()), Some(items.len() as u64))
}

#[derive(Default)]
pub(crate) struct FakeUpstream {
    agents: Vec<Agent>,
    sessions: HashMap<String, Vec<UpstreamSession>>,
    /// Pre-built snapshot listing pages per agent.
    log_pages: HashMap<String, Vec<Page<LogEntry>>>,
    /// Per-session log lines, served in `limit`-sized slices.
    session_logs: HashMap<String, Vec<LogEntry>>,
    failing_logs: HashSet<String>,
    failing_sessions: HashSet<String>,
    requests: Mutex<Vec<(String, u32)>>,
    last_query: Mutex<Option<String>>,
}

impl FakeUpstream {
    pub(crate) fn with_agent(mut self, agent_id: &str, name: &str) -> Self {
        self.agents.push(Agent {
            agent_id: agent_id.into(),
            name: name.into(),
        });
        self
    }

    pub(crate) fn with_sessions(mut self, agent: &str, sessions: Vec<UpstreamSession>) -> Self {
        self.sessions.insert(agent.into(), sessions);
        self
    }

    pub(crate) fn with_log_pages(mut self, agent: &str, pages: Vec<Page<LogEntry>>) -> Self {
        self.log_pages.insert(agent.into(), pages);
        self
    }

    pub(crate) fn with_session_logs(mut self, session_id: &str, logs: Vec<LogEntry>) -> Self {
        self.session_logs.insert(session_id.into(), logs);
        self
    }

    pub(crate) fn failing_logs(mut self, agent: &str) -> Self {
        self.failing_logs.insert(agent.into());
        self
    }

    pub(crate) fn failing_sessions(mut self, agent: &str) -> Self {
        self.failing_sessions.insert(agent.into());
        self
    }

    /// Pages requested from the agent-wide log listing, in order.
    pub(crate) fn log_pages_requested(&self, agent: &str) -> Vec<u32> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == agent)
            .map(|(_, page)| *page)
            .collect()
    }

    pub(crate) fn last_query(&self) -> Option<String> {
        self.last_query.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamApi for FakeUpstream {
    async fn list_agents(&self, page: u32, limit: u32) -> Result<Page<Agent>, UpstreamError> {
        Ok(slice_page(&self.agents, page, limit))
    }

    async fn list_sessions(
        &self,
        agent_name: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<UpstreamSession>, UpstreamError> {
        if self.failing_sessions.contains(agent_name) {
            return Err(server_error("sessions"));
        }
        let sessions = self.sessions.get(agent_name).map(Vec::as_slice).unwrap_or(&[]);
        Ok(slice_page(sessions, page, limit))
    }

    async fn list_logs(
        &self,
        agent_name: &str,
        session_id: Option<&str>,
        page: u32,
        limit: u32,
        query: Option<&str>,
    ) -> Result<Page<LogEntry>, UpstreamError> {
        if self.failing_logs.contains(agent_name) {
            return Err(server_error("logs"));
        }
        if let Some(session_id) = session_id {
            let logs = self.session_logs.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
            return Ok(slice_page(logs, page, limit));
        }

        self.requests
            .lock()
            .unwrap()
            .push((agent_name.to_string(), page));
        *self.last_query.lock().unwrap() = query.map(str::to_string);

        Ok(self
            .log_pages
            .get(agent_name)
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .unwrap_or_else(Page::empty))
    }
}
