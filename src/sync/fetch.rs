//! Incremental fetch controller: pages through an agent's snapshot logs.
//!
//! Listings are exposed as lazy page streams: a request is only made when the
//! consumer pulls the next page, so stopping early never costs an extra call.
//!
//! The horizon check assumes the platform returns logs newest first. If it
//! ever returned ascending or unordered pages, the first old entry would cut
//! the fetch short and skip newer data further down.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt, stream};
use tracing::debug;

use super::selector::SessionContextSelector;
use crate::error::UpstreamError;
use crate::model::Agent;
use crate::upstream::{Page, UpstreamApi, UpstreamSession};

/// Settings for one agent's snapshot fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: u32,
    /// Sleep before every page after the first.
    pub page_delay: Duration,
    /// Entries older than this end the fetch.
    pub horizon: DateTime<Utc>,
    /// Server-side substring filter matching both snapshot kinds.
    pub query: Option<String>,
}

/// Counters from one agent's fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub pages: u32,
    /// Entries inside the horizon that were offered to the selector.
    pub entries: usize,
    /// Sessions with a selected snapshot.
    pub snapshots: usize,
    /// Snapshots dropped for lacking a session id.
    pub discarded: usize,
    pub early_stopped: bool,
}

/// Lazy, finite stream of pages starting at page 1.
///
/// Ends after a page upstream sent short of `page_size`, or one flagged as the last.
/// Calling it again restarts from the first page.
pub fn paginate<T, F, Fut>(
    page_size: u32,
    page_delay: Duration,
    fetch: F,
) -> impl Stream<Item = Result<Page<T>, UpstreamError>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, UpstreamError>>,
{
    stream::try_unfold((fetch, Some(1u32)), move |(mut fetch, next)| async move {
        let Some(page) = next else {
            return Ok::<_, UpstreamError>(None);
        };
        if page > 1 && !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
        let result = fetch(page).await?;
        let next = result.continues(page_size).then_some(page + 1);
        Ok(Some((result, (fetch, next))))
    })
}

/// Every agent the platform lists.
pub async fn list_all_agents(
    api: &dyn UpstreamApi,
    page_size: u32,
    page_delay: Duration,
) -> Result<Vec<Agent>, UpstreamError> {
    paginate(page_size, page_delay, |page| api.list_agents(page, page_size))
        .map_ok(|page| stream::iter(page.items.into_iter().map(Ok::<_, UpstreamError>)))
        .try_flatten()
        .try_collect()
        .await
}

/// An agent's sessions, newest first, up to the first one started before `horizon`.
///
/// Sessions without a start time are kept.
pub async fn list_recent_sessions(
    api: &dyn UpstreamApi,
    agent_name: &str,
    page_size: u32,
    page_delay: Duration,
    horizon: DateTime<Utc>,
) -> Result<Vec<UpstreamSession>, UpstreamError> {
    let pages = paginate(page_size, page_delay, |page| {
        api.list_sessions(agent_name, page, page_size)
    });
    let mut pages = std::pin::pin!(pages);
    let mut sessions = Vec::new();

    while let Some(page) = pages.try_next().await? {
        for session in page.items {
            if session.started_at.is_some_and(|at| at < horizon) {
                debug!(agent = agent_name, kept = sessions.len(), "Session listing reached horizon");
                return Ok(sessions);
            }
            sessions.push(session);
        }
    }
    Ok(sessions)
}

/// Page through an agent's snapshot logs, feeding `selector`.
///
/// Stops at the first entry older than the horizon. An upstream error aborts
/// the fetch; the caller should discard the partially filled selector.
pub async fn fetch_agent_snapshots(
    api: &dyn UpstreamApi,
    agent_name: &str,
    options: &FetchOptions,
    selector: &mut SessionContextSelector,
) -> Result<FetchReport, UpstreamError> {
    let mut report = FetchReport::default();
    let query = options.query.as_deref();

    let pages = paginate(options.page_size, options.page_delay, |page| {
        api.list_logs(agent_name, None, page, options.page_size, query)
    });
    let mut pages = std::pin::pin!(pages);

    'pages: while let Some(page) = pages.try_next().await? {
        report.pages += 1;
        for entry in &page.items {
            if entry.timestamp < options.horizon {
                debug!(
                    agent = agent_name,
                    page = report.pages,
                    timestamp = %entry.timestamp,
                    "Reached sync horizon, stopping fetch"
                );
                report.early_stopped = true;
                break 'pages;
            }
            report.entries += 1;
            selector.observe_log(&entry.message, entry.timestamp);
        }
    }

    report.snapshots = selector.len();
    report.discarded = selector.discarded();
    debug!(
        agent = agent_name,
        pages = report.pages,
        entries = report.entries,
        snapshots = report.snapshots,
        early_stopped = report.early_stopped,
        "Agent fetch complete"
    );
    Ok(report)
}
