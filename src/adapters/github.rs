use super::{bump_common_counters, ChunkStream, EMPTY_PAGE_LIMIT};
use crate::block::{AdapterState, BlockDescriptor, Chunk, Credential};
use crate::config::Tunables;
use crate::errors::AdapterError;
use crate::http_client::CrawlerHttpClient;
use async_stream::stream;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const GITHUB_QUERY_MAX: i64 = 100;

/// Fields requested per repository node. Grounded on the sample response
/// documented in `original_source/crawlers/lib/platforms/github/github_v4.py`.
const QUERY: &str = r#"
query($ids: [ID!]!) {
  nodes(ids: $ids) {
    ... on Repository {
      id
      name
      nameWithOwner
      homepageUrl
      url
      createdAt
      updatedAt
      pushedAt
      description
      isArchived
      isPrivate
      isFork
      isEmpty
      isDisabled
      isLocked
      isTemplate
      stargazerCount
      forkCount
      diskUsage
      owner { login }
      repositoryTopics(first: 20) { nodes { topic { name } } }
      primaryLanguage { name }
      licenseInfo { name }
    }
  }
  rateLimit {
    remaining
    resetAt
  }
}
"#;

pub struct GitHubAdapter {
    http: CrawlerHttpClient,
    api_url: String,
    token: String,
    extra_headers: HashMap<String, String>,
    tunables: Tunables,
}

impl GitHubAdapter {
    pub fn new(block: &BlockDescriptor, http: CrawlerHttpClient, tunables: Tunables) -> Result<Self, AdapterError> {
        let token = match block.hosting_service.credential().map_err(AdapterError::Config)? {
            Some(Credential::Bearer { token }) => token,
            _ => return Err(AdapterError::Config("github adapter requires a bearer token".to_string())),
        };
        Ok(Self {
            http,
            api_url: format!("{}/graphql", block.hosting_service.api_url.trim_end_matches('/')),
            token,
            extra_headers: block.hosting_service.crawler_request_headers.clone(),
            tunables,
        })
    }

    pub fn state_from_block(&self, block: &BlockDescriptor) -> AdapterState {
        let mut state = AdapterState::new();
        state.set("from_id", block.from_id.unwrap_or(0));
        state.set("to_id", block.to_id);
        state.set("ids", block.ids.clone());
        state
    }

    pub fn set_state(&self, mut state: AdapterState) -> AdapterState {
        bump_common_counters(&mut state);
        if state.get("from_id").is_none() {
            state.set("from_id", 0i64);
        }
        if state.get("to_id").is_none() {
            state.set("to_id", -1i64);
        }
        if state.get("ids").is_none() {
            state.set("ids", Vec::<i64>::new());
        }
        state
    }

    pub fn has_next(&self, state: &AdapterState) -> bool {
        has_next_static(state)
    }

    /// Base64-encode a numeric GitHub repository ID into the legacy global
    /// node ID format. `encode_id(17558226) ==
    /// "MDEwOlJlcG9zaXRvcnkxNzU1ODIyNg=="`.
    pub fn encode_id(n: i64) -> String {
        STANDARD.encode(format!("010:Repository{n}"))
    }

    fn next_ids(state: &AdapterState) -> Vec<String> {
        let ids = ids_of(state);
        let i = state.get_i64("i").unwrap_or(0);
        let batch: Vec<i64> = if !ids.is_empty() {
            let start = (i * GITHUB_QUERY_MAX) as usize;
            ids.into_iter().skip(start).take(GITHUB_QUERY_MAX as usize).collect()
        } else {
            let from_id = state.get_i64("from_id").unwrap_or(0);
            let start = from_id + i * GITHUB_QUERY_MAX;
            (start..start + GITHUB_QUERY_MAX).collect()
        };
        batch.into_iter().map(Self::encode_id).collect()
    }

    pub fn crawl(&self, initial_state: AdapterState) -> ChunkStream {
        let http = self.http.clone();
        let api_url = self.api_url.clone();
        let mut extra_headers = self.extra_headers.clone();
        extra_headers.entry("Authorization".to_string()).or_insert_with(|| format!("Bearer {}", self.token));
        let tunables = self.tunables.clone();
        Box::pin(stream! {
            let mut state = initial_state;
            while has_next_static(&state) {
                let node_ids = Self::next_ids(&state);
                let body = serde_json::json!({
                    "query": QUERY,
                    "variables": { "ids": node_ids },
                });

                let mut abuse_attempts = 0u32;
                let chunk_result = loop {
                    match http.post(&api_url, &body, &extra_headers, None).await {
                        Ok(resp) => {
                            if resp.status().as_u16() == 403 {
                                abuse_attempts += 1;
                                if abuse_attempts > tunables.github_abuse_retry_max {
                                    warn!("github abuse retries exhausted, failing chunk");
                                    break Err(());
                                }
                                warn!(attempt = abuse_attempts, "github 403 (abuse detection), sleeping then retrying same query");
                                tokio::time::sleep(Duration::from_secs(tunables.github_abuse_sleep_secs)).await;
                                continue;
                            }
                            if !resp.status().is_success() {
                                warn!(status = resp.status().as_u16(), "github response not ok, failing chunk");
                                break Err(());
                            }
                            let json: serde_json::Value = match resp.json().await {
                                Ok(v) => v,
                                Err(e) => { warn!(error = %e, "github response parse error"); break Err(()); }
                            };
                            if let Some(errors) = json.get("errors").and_then(|e| e.as_array()) {
                                let rate_limited = errors.iter().any(|e| e.get("type").and_then(|t| t.as_str()) == Some("RATE_LIMITED"));
                                if rate_limited && abuse_attempts == 0 {
                                    abuse_attempts += 1;
                                    warn!("github body-level RATE_LIMITED, sleeping then retrying once");
                                    tokio::time::sleep(Duration::from_secs(tunables.github_ratelimit_sleep_secs)).await;
                                    continue;
                                }
                            }
                            break Ok(json);
                        }
                        Err(e) => {
                            warn!(error = %e, "github http error, failing chunk");
                            break Err(());
                        }
                    }
                };

                match chunk_result {
                    Ok(json) => {
                        let nodes = json.get("data").and_then(|d| d.get("nodes")).and_then(|n| n.as_array()).cloned().unwrap_or_default();
                        let records: Vec<serde_json::Value> = nodes.into_iter().filter(|n| !n.is_null()).collect();
                        if records.is_empty() {
                            let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0) + 1;
                            state.set("empty_page_count", empty_page_count);
                        }
                        info!(count = records.len(), "github chunk parsed");
                        handle_ratelimit(json.get("data").and_then(|d| d.get("rateLimit")), tunables.default_throttle_ms).await;
                        yield Chunk::success(records, state.clone());
                    }
                    Err(()) => {
                        yield Chunk::failure(state.clone());
                        handle_ratelimit(None, tunables.default_throttle_ms).await;
                    }
                }

                bump_common_counters(&mut state);
            }
        })
    }
}

fn ids_of(state: &AdapterState) -> Vec<i64> {
    state
        .get("ids")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_i64()).collect())
        .unwrap_or_default()
}

fn has_next_static(state: &AdapterState) -> bool {
    let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0) as u32;
    if empty_page_count >= EMPTY_PAGE_LIMIT {
        return false;
    }
    let ids = ids_of(state);
    if !ids.is_empty() {
        let i = state.get_i64("i").unwrap_or(0);
        return (i * GITHUB_QUERY_MAX) < ids.len() as i64;
    }
    let to_id = state.get_i64("to_id").unwrap_or(-1);
    if to_id == -1 {
        return true;
    }
    let from_id = state.get_i64("from_id").unwrap_or(0);
    let i = state.get_i64("i").unwrap_or(0);
    from_id + i * GITHUB_QUERY_MAX < to_id
}

/// Sleep until GitHub's rate-limit window resets (plus a one-second
/// cushion), or apply the default throttle when no signal is available.
/// Mirrors `github_v4.py`'s `handle_ratelimit`'s `reset_in += 1`.
async fn handle_ratelimit(rate_limit: Option<&serde_json::Value>, default_throttle_ms: u64) {
    if let Some(rl) = rate_limit {
        let remaining = rl.get("remaining").and_then(|v| v.as_i64()).unwrap_or(1);
        if remaining < 1 {
            if let Some(reset_at) = rl.get("resetAt").and_then(|v| v.as_str()) {
                if let Ok(reset_at) = DateTime::parse_from_rfc3339(reset_at) {
                    let reset_at: DateTime<Utc> = reset_at.with_timezone(&Utc);
                    let now = Utc::now();
                    let reset_in = (reset_at - now).num_seconds() + 1;
                    if reset_in > 0 {
                        warn!(reset_in, "github rate limit exhausted, sleeping until reset");
                        tokio::time::sleep(Duration::from_secs(reset_in as u64)).await;
                        return;
                    }
                }
            }
        }
        return;
    }
    tokio::time::sleep(Duration::from_millis(default_throttle_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_id_matches_spec_example() {
        assert_eq!(GitHubAdapter::encode_id(17558226), "MDEwOlJlcG9zaXRvcnkxNzU1ODIyNg==");
    }

    #[test]
    fn has_next_false_once_empty_page_limit_reached() {
        let mut state = AdapterState::new();
        state.set("to_id", -1i64);
        state.set("from_id", 0i64);
        state.set("ids", Vec::<i64>::new());
        state.set("i", 0i64);
        state.set("empty_page_count", 10u64);
        assert!(!has_next_static(&state));
    }

    #[test]
    fn has_next_false_once_ids_list_is_exhausted_even_with_unbounded_to_id() {
        let mut state = AdapterState::new();
        state.set("to_id", -1i64);
        state.set("from_id", 0i64);
        state.set("ids", vec![1i64, 2, 3]);
        state.set("i", 1i64);
        assert!(!has_next_static(&state));
    }

    #[test]
    fn next_ids_uses_ids_slice_when_present() {
        let mut state = AdapterState::new();
        state.set("ids", vec![1i64, 2, 3]);
        state.set("from_id", 0i64);
        state.set("i", 0i64);
        let ids = GitHubAdapter::next_ids(&state);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], GitHubAdapter::encode_id(1));
    }
}
