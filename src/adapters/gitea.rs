use super::{bump_common_counters, ChunkStream, EMPTY_PAGE_LIMIT};
use crate::block::{AdapterState, BlockDescriptor, Chunk, Credential};
use crate::config::Tunables;
use crate::errors::AdapterError;
use crate::http_client::CrawlerHttpClient;
use async_stream::stream;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_PER_PAGE: u32 = 50;

/// Page-based search against `{api_url}/api/v1/repos/search`. Grounded on
/// `original_source/crawlers/lib/platforms/gitea.py`'s page-increment loop
/// (`page += 1` with a half-second throttle), generalized to the
/// has_next/crawl contract and spec.md's query-parameter names.
pub struct GiteaAdapter {
    http: CrawlerHttpClient,
    search_url: String,
    auth_header: Option<String>,
    extra_headers: HashMap<String, String>,
    tunables: Tunables,
}

impl GiteaAdapter {
    pub fn new(block: &BlockDescriptor, http: CrawlerHttpClient, tunables: Tunables) -> Result<Self, AdapterError> {
        let auth_header = match block.hosting_service.credential().map_err(AdapterError::Config)? {
            Some(Credential::Bearer { token }) => Some(format!("Bearer {token}")),
            None => None,
            _ => return Err(AdapterError::Config("gitea adapter expects a bearer token or no credential".to_string())),
        };
        Ok(Self {
            http,
            search_url: format!("{}/api/v1/repos/search", block.hosting_service.api_url.trim_end_matches('/')),
            auth_header,
            extra_headers: block.hosting_service.crawler_request_headers.clone(),
            tunables,
        })
    }

    pub fn state_from_block(&self, _block: &BlockDescriptor) -> AdapterState {
        AdapterState::new()
    }

    pub fn set_state(&self, mut state: AdapterState) -> AdapterState {
        bump_common_counters(&mut state);
        if state.get_u64("page").is_none() {
            state.set("page", 1u64);
        }
        if state.get_u64("per_page").is_none() {
            state.set("per_page", DEFAULT_PER_PAGE as u64);
        }
        if state.get_bool("is_done").is_none() {
            state.set("is_done", false);
        }
        state
    }

    pub fn has_next(&self, state: &AdapterState) -> bool {
        let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0) as u32;
        !state.get_bool("is_done").unwrap_or(false) && empty_page_count < EMPTY_PAGE_LIMIT
    }

    pub fn crawl(&self, initial_state: AdapterState) -> ChunkStream {
        let http = self.http.clone();
        let url = self.search_url.clone();
        let auth_header = self.auth_header.clone();
        let mut extra_headers = self.extra_headers.clone();
        if let Some(auth) = &auth_header {
            extra_headers.entry("Authorization".to_string()).or_insert_with(|| auth.clone());
        }
        let tunables = self.tunables.clone();
        Box::pin(stream! {
            let mut state = initial_state;
            while !state.get_bool("is_done").unwrap_or(false) && (state.get_u64("empty_page_count").unwrap_or(0) as u32) < EMPTY_PAGE_LIMIT {
                let page = state.get_u64("page").unwrap_or(1);
                let per_page = state.get_u64("per_page").unwrap_or(DEFAULT_PER_PAGE as u64);
                let page_str = page.to_string();
                let per_page_str = per_page.to_string();
                let query = [("sort", "created"), ("limit", per_page_str.as_str()), ("page", page_str.as_str())];

                match http.get(&url, &query, &extra_headers, None).await {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<serde_json::Value>().await {
                            Ok(body) => {
                                let items = body.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default();
                                info!(page, count = items.len(), "gitea page fetched");
                                if (items.len() as u64) < per_page {
                                    state.set("is_done", true);
                                }
                                state.set("page", page + 1);
                                if items.is_empty() {
                                    let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0) + 1;
                                    state.set("empty_page_count", empty_page_count);
                                }
                                yield Chunk::success(items, state.clone());
                            }
                            Err(e) => {
                                warn!(error = %e, "gitea response parse error");
                                yield Chunk::failure(state.clone());
                            }
                        }
                    }
                    Ok(resp) => {
                        warn!(status = resp.status().as_u16(), "gitea response not ok, failing chunk");
                        yield Chunk::failure(state.clone());
                    }
                    Err(e) => {
                        warn!(error = %e, "gitea http error, failing chunk");
                        yield Chunk::failure(state.clone());
                    }
                }

                tokio::time::sleep(Duration::from_millis(tunables.default_throttle_ms)).await;
                bump_common_counters(&mut state);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_page_marks_done() {
        let mut state = AdapterState::new();
        state.set("page", 2u64);
        state.set("per_page", 50u64);
        state.set("is_done", false);
        let items_len: u64 = 7;
        if items_len < state.get_u64("per_page").unwrap() {
            state.set("is_done", true);
        }
        assert!(state.get_bool("is_done").unwrap());
    }
}
