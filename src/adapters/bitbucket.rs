use super::{bump_common_counters, ChunkStream, EMPTY_PAGE_LIMIT};
use crate::block::{AdapterState, BlockDescriptor, Chunk, Credential};
use crate::config::Tunables;
use crate::errors::AdapterError;
use crate::http_client::CrawlerHttpClient;
use async_stream::stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";
const INITIAL_PAGE_URL_TEMPLATE: &str = "{api_url}/2.0/repositories/?pagelen=100&sort=-created_on";

/// The OAuth token endpoint is fixed (Bitbucket Cloud only issues tokens
/// from `bitbucket.org`, regardless of which API host a block names), but
/// tests need to point it at a mock server; `BITBUCKET_OAUTH_URL` overrides
/// it the same way other ambient settings here are env-overridable.
fn oauth_token_url() -> String {
    std::env::var("BITBUCKET_OAUTH_URL").unwrap_or_else(|_| TOKEN_URL.to_string())
}

/// OAuth client-credentials token cache: a fetched token plus the epoch
/// second it expires at, refreshed lazily on first use or after expiry.
/// Grounded on `original_source/crawlers/lib/platforms/bitbucket.py`'s
/// `Oauth2Client.request` wrapper, which re-fetches whenever the cached
/// token is absent or stale.
#[derive(Debug, Clone, Default)]
struct CachedToken {
    access_token: Option<String>,
    expires_at: i64,
}

pub struct BitbucketAdapter {
    http: CrawlerHttpClient,
    api_url: String,
    client_id: String,
    client_secret: String,
    extra_headers: HashMap<String, String>,
    tunables: Tunables,
    token: Arc<Mutex<CachedToken>>,
}

impl BitbucketAdapter {
    pub fn new(block: &BlockDescriptor, http: CrawlerHttpClient, tunables: Tunables) -> Result<Self, AdapterError> {
        let (client_id, client_secret) = match block.hosting_service.credential().map_err(AdapterError::Config)? {
            Some(Credential::OAuthClientCredentials { client_id, client_secret }) => (client_id, client_secret),
            _ => return Err(AdapterError::Config("bitbucket adapter requires OAuth client_id/client_secret".to_string())),
        };
        Ok(Self {
            http,
            api_url: block.hosting_service.api_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            extra_headers: block.hosting_service.crawler_request_headers.clone(),
            tunables,
            token: Arc::new(Mutex::new(CachedToken::default())),
        })
    }

    pub fn state_from_block(&self, _block: &BlockDescriptor) -> AdapterState {
        AdapterState::new()
    }

    pub fn set_state(&self, mut state: AdapterState) -> AdapterState {
        bump_common_counters(&mut state);
        state
    }

    pub fn has_next(&self, state: &AdapterState) -> bool {
        let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0) as u32;
        state.get_str("next_url").is_some() || (state.get_i64("i").unwrap_or(-1) < 0 && empty_page_count < EMPTY_PAGE_LIMIT)
    }

    pub fn crawl(&self, initial_state: AdapterState) -> ChunkStream {
        let http = self.http.clone();
        let first_page_url = INITIAL_PAGE_URL_TEMPLATE.replace("{api_url}", &self.api_url);
        let extra_headers = self.extra_headers.clone();
        let tunables = self.tunables.clone();
        let this_token = self.token.clone();
        let client_id = self.client_id.clone();
        let client_secret = self.client_secret.clone();
        Box::pin(stream! {
            let mut state = initial_state;
            let mut request_url = state.get_str("next_url").map(|s| s.to_string()).unwrap_or_else(|| first_page_url.clone());
            loop {
                let token = match fetch_token(&http, &this_token, &client_id, &client_secret).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "bitbucket token fetch failed, failing chunk");
                        yield Chunk::failure(state.clone());
                        break;
                    }
                };
                let mut headers = extra_headers.clone();
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));

                match http.get(&request_url, &[], &headers, None).await {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<serde_json::Value>().await {
                            Ok(body) => {
                                let items = body.get("values").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                                let next = body.get("next").and_then(|v| v.as_str()).map(|s| s.to_string());
                                info!(count = items.len(), has_next = next.is_some(), "bitbucket page fetched");
                                if items.is_empty() {
                                    let empty_page_count = state.get_u64("empty_page_count").unwrap_or(0) + 1;
                                    state.set("empty_page_count", empty_page_count);
                                }
                                match next {
                                    Some(next_url) => {
                                        state.set("next_url", next_url.clone());
                                        request_url = next_url;
                                        yield Chunk::success(items, state.clone());
                                    }
                                    None => {
                                        yield Chunk::success_done(items);
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "bitbucket response parse error");
                                yield Chunk::failure(state.clone());
                                break;
                            }
                        }
                    }
                    Ok(resp) => {
                        warn!(status = resp.status().as_u16(), "bitbucket response not ok, failing chunk");
                        yield Chunk::failure(state.clone());
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "bitbucket http error, failing chunk");
                        yield Chunk::failure(state.clone());
                        break;
                    }
                }

                bump_common_counters(&mut state);
                if (state.get_u64("empty_page_count").unwrap_or(0) as u32) >= EMPTY_PAGE_LIMIT {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(tunables.default_throttle_ms)).await;
            }
        })
    }
}

async fn fetch_token(
    http: &CrawlerHttpClient,
    cache: &Arc<Mutex<CachedToken>>,
    client_id: &str,
    client_secret: &str,
) -> Result<String, AdapterError> {
    let now = chrono::Utc::now().timestamp();
    {
        let cached = cache.lock().await;
        if let Some(tok) = &cached.access_token {
            if cached.expires_at > now + 5 {
                return Ok(tok.clone());
            }
        }
    }
    let resp = http
        .post_form_basic_auth(&oauth_token_url(), &[("grant_type", "client_credentials")], client_id, client_secret)
        .await
        .map_err(AdapterError::Http)?;
    let body: serde_json::Value = resp.json().await.map_err(|e| AdapterError::Parse(e.to_string()))?;
    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AdapterError::Parse("bitbucket token response missing access_token".to_string()))?
        .to_string();
    let expires_in = body.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
    let mut cached = cache.lock().await;
    cached.access_token = Some(access_token.clone());
    cached.expires_at = now + expires_in;
    Ok(access_token)
}
