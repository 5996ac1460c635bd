use crate::block::{BlockDescriptor, RepositoryRecord};
use crate::errors::WorkerError;
use crate::http_client::CrawlerHttpClient;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, warn};

/// One entry of `GET {indexer}/api/v1/hosters`.
#[derive(Debug, Clone, Deserialize)]
pub struct HosterSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub hoster_type: String,
    pub api_url: String,
}

/// Wraps indexer communication with the escalating-failure policy from
/// spec.md §4.1/§7: consecutive failures are counted across calls, and once
/// `max_errors` is reached the worker loop is meant to exit the process
/// rather than keep retrying indefinitely.
pub struct IndexerClient {
    http: CrawlerHttpClient,
    base_url: String,
    max_errors: u32,
    consecutive_errors: u32,
}

impl IndexerClient {
    pub fn new(http: CrawlerHttpClient, base_url: String, max_errors: u32) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), max_errors, consecutive_errors: 0 }
    }

    fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    fn record_failure(&mut self) -> Result<(), WorkerError> {
        self.consecutive_errors += 1;
        warn!(consecutive_errors = self.consecutive_errors, max = self.max_errors, "indexer call failed");
        if self.consecutive_errors >= self.max_errors {
            error!("indexer unreachable after {} consecutive failures", self.consecutive_errors);
            return Err(WorkerError::IndexerUnreachable);
        }
        Ok(())
    }

    pub async fn list_hosters(&mut self) -> Result<Vec<HosterSummary>, WorkerError> {
        let url = format!("{}/api/v1/hosters", self.base_url);
        match self.http.get(&url, &[], &HashMap::new(), None).await {
            Ok(resp) => match resp.json::<Vec<HosterSummary>>().await {
                Ok(v) => {
                    self.record_success();
                    Ok(v)
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse hosters list");
                    self.record_failure()?;
                    Ok(vec![])
                }
            },
            Err(e) => {
                warn!(error = %e, "hosters list request failed");
                self.record_failure()?;
                Ok(vec![])
            }
        }
    }

    pub async fn fetch_block(&mut self, block_url: &str) -> Result<Option<BlockDescriptor>, WorkerError> {
        match self.http.get(block_url, &[], &HashMap::new(), None).await {
            Ok(resp) => match resp.json::<BlockDescriptor>().await {
                Ok(block) => {
                    self.record_success();
                    Ok(Some(block))
                }
                Err(e) => {
                    warn!(error = %e, block_url, "failed to parse block descriptor");
                    self.record_failure()?;
                    Ok(None)
                }
            },
            Err(e) => {
                warn!(error = %e, block_url, "block fetch failed");
                self.record_failure()?;
                Ok(None)
            }
        }
    }

    pub fn hoster_block_url(&self, hoster_id: &str) -> String {
        format!("{}/api/v1/hosters/{}/block", self.base_url, hoster_id)
    }

    pub fn loadbalanced_block_url(&self, platform_type: &str) -> String {
        format!("{}/api/v1/hosters/{}/loadbalanced_block", self.base_url, platform_type)
    }

    /// `PUT <callback_url>` with the aggregated records. Failures here do
    /// not count against the indexer-communication error budget: the
    /// callback is a separate host the block itself named, not the
    /// indexer's own API surface.
    pub async fn put_callback(&self, callback_url: &str, records: &[RepositoryRecord]) -> Result<(), ()> {
        let body = serde_json::Value::Array(records.to_vec());
        match self.http.put(callback_url, &body, &HashMap::new(), None).await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), callback_url, "callback PUT returned non-2xx");
                Err(())
            }
            Err(e) => {
                warn!(error = %e, callback_url, "callback PUT failed");
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_budget_flips_to_unreachable_only_at_threshold() {
        let http = CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5);
        let mut client = IndexerClient::new(http, "http://indexer".to_string(), 3);
        assert!(client.record_failure().is_ok());
        assert!(client.record_failure().is_ok());
        assert!(client.record_failure().is_err());
    }

    #[test]
    fn success_resets_the_error_budget() {
        let http = CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5);
        let mut client = IndexerClient::new(http, "http://indexer".to_string(), 3);
        client.record_failure().unwrap();
        client.record_failure().unwrap();
        client.record_success();
        assert_eq!(client.consecutive_errors, 0);
    }
}
