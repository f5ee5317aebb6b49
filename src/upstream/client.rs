//! reqwest-backed `UpstreamApi` implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use super::fields::{agent_from_value, log_from_value, session_from_value};
use super::{LogEntry, Page, UpstreamApi, UpstreamSession};
use crate::error::{ConfigError, UpstreamError};
use crate::model::Agent;

/// Response envelope shared by every listing endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "data", default)]
    items: Vec<serde_json::Value>,
    #[serde(alias = "hasMore", default)]
    has_more: Option<bool>,
    #[serde(default)]
    total: Option<u64>,
}

/// HTTP client for the agent platform.
pub struct HttpUpstream {
    base_url: Url,
    api_key: SecretString,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            key: "UPSTREAM_BASE_URL".into(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "UPSTREAM_BASE_URL".into(),
                message: format!("{base_url} cannot be used as a base URL"),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "UPSTREAM_BASE_URL".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url,
            api_key,
            timeout,
            client,
        })
    }

    /// Base URL joined with percent-encoded path segments.
    fn endpoint_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_page(
        &self,
        endpoint: &str,
        url: Url,
        params: &[(&str, String)],
    ) -> Result<Envelope, UpstreamError> {
        debug!(endpoint, url = %url, "Upstream request");

        let resp = self
            .client
            .get(url)
            .bearer_auth(self.api_key.expose_secret())
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout {
                        endpoint: endpoint.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    UpstreamError::Transport {
                        endpoint: endpoint.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Envelope>()
            .await
            .map_err(|e| UpstreamError::Decode {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Normalize an envelope, dropping items the field contract cannot read.
fn into_page<T>(
    endpoint: &str,
    envelope: Envelope,
    normalize: impl Fn(&serde_json::Value) -> Option<T>,
) -> Page<T> {
    let received = envelope.items.len();
    let items: Vec<T> = envelope.items.iter().filter_map(normalize).collect();
    if items.len() < received {
        warn!(
            endpoint,
            dropped = received - items.len(),
            "Skipped upstream items missing required fields"
        );
    }
    Page {
        items,
        received,
        has_more: envelope.has_more,
        total: envelope.total,
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn list_agents(&self, page: u32, limit: u32) -> Result<Page<Agent>, UpstreamError> {
        let url = self.endpoint_url(&["agents"]);
        let params = [("page", page.to_string()), ("limit", limit.to_string())];
        let envelope = self.get_page("list_agents", url, &params).await?;
        Ok(into_page("list_agents", envelope, agent_from_value))
    }

    async fn list_sessions(
        &self,
        agent_name: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<UpstreamSession>, UpstreamError> {
        let url = self.endpoint_url(&["agents", agent_name, "sessions"]);
        let params = [("page", page.to_string()), ("limit", limit.to_string())];
        let envelope = self.get_page("list_sessions", url, &params).await?;
        Ok(into_page("list_sessions", envelope, session_from_value))
    }

    async fn list_logs(
        &self,
        agent_name: &str,
        session_id: Option<&str>,
        page: u32,
        limit: u32,
        query: Option<&str>,
    ) -> Result<Page<LogEntry>, UpstreamError> {
        let url = self.endpoint_url(&["agents", agent_name, "logs"]);
        let mut params = vec![("page", page.to_string()), ("limit", limit.to_string())];
        if let Some(session_id) = session_id {
            params.push(("session_id", session_id.to_string()));
        }
        if let Some(query) = query {
            params.push(("query", query.to_string()));
        }
        let envelope = self.get_page("list_logs", url, &params).await?;
        Ok(into_page("list_logs", envelope, log_from_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpUpstream {
        HttpUpstream::new(base, SecretString::from("test-key"), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn endpoint_url_encodes_agent_names() {
        let c = client("https://api.example.com/v1/");
        let url = c.endpoint_url(&["agents", "support bot", "logs"]);
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/agents/support%20bot/logs"
        );
    }

    #[test]
    fn endpoint_url_without_trailing_slash() {
        let c = client("https://api.example.com/v1");
        assert_eq!(
            c.endpoint_url(&["agents"]).as_str(),
            "https://api.example.com/v1/agents"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = HttpUpstream::new("not a url", SecretString::from("k"), Duration::from_secs(1));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn envelope_accepts_both_spellings() {
        let a: Envelope =
            serde_json::from_str(r#"{"items": [{"id": "x"}], "hasMore": true, "total": 7}"#).unwrap();
        assert_eq!(a.items.len(), 1);
        assert_eq!(a.has_more, Some(true));
        assert_eq!(a.total, Some(7));

        let b: Envelope = serde_json::from_str(r#"{"data": [], "has_more": false}"#).unwrap();
        assert!(b.items.is_empty());
        assert_eq!(b.has_more, Some(false));

        let c: Envelope = serde_json::from_str(r#"{"data": [{"id": "x"}]}"#).unwrap();
        assert_eq!(c.has_more, None);
    }

    #[test]
    fn into_page_drops_unreadable_items() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"items": [{"id": "a1", "name": "support"}, {"name": "no id"}], "hasMore": false}"#,
        )
        .unwrap();
        let page = into_page("list_agents", envelope, agent_from_value);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "support");
        assert_eq!(page.received, 2);
    }

    #[test]
    fn unreadable_log_keeps_full_page_going() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"items": [
                {"id": "l1", "message": "hello", "timestamp": "2024-05-01T12:00:00Z"},
                {"id": "l2", "message": "no time"}
            ], "hasMore": true}"#,
        )
        .unwrap();
        let page = into_page("list_logs", envelope, log_from_value);
        assert_eq!(page.items.len(), 1);
        assert!(page.continues(2));
    }

    #[test]
    fn envelope_without_flag_pages_by_size() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"data": [{"id": "a1", "name": "one"}, {"id": "a2", "name": "two"}]}"#,
        )
        .unwrap();
        let page = into_page("list_agents", envelope, agent_from_value);
        assert!(page.continues(2));
        assert!(!page.continues(3));
    }
}
