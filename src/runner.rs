use crate::adapters::Adapter;
use crate::block::{BlockDescriptor, BlockStatus, RepositoryRecord};
use crate::config::Tunables;
use crate::http_client::CrawlerHttpClient;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{info, warn};

/// The six-step algorithm of spec.md §4.3: instantiate the adapter for a
/// block, drive its lazy chunk sequence to exhaustion, and aggregate the
/// successful records. Never propagates an adapter's failed chunk into the
/// aggregate — a failed chunk would otherwise let the indexer misread an
/// empty callback body as "range complete".
pub struct BlockRunner {
    http: CrawlerHttpClient,
    tunables: Tunables,
}

pub struct RunOutcome {
    pub records: Vec<RepositoryRecord>,
    pub callback_url: Option<String>,
}

impl RunOutcome {
    fn empty() -> Self {
        Self { records: Vec::new(), callback_url: None }
    }
}

impl BlockRunner {
    pub fn new(http: CrawlerHttpClient, tunables: Tunables) -> Self {
        Self { http, tunables }
    }

    pub async fn run(&self, block: BlockDescriptor) -> RunOutcome {
        if block.status == BlockStatus::Sleep {
            let now = chrono::Utc::now().timestamp() as f64;
            let sleep_secs = (block.retry_at.unwrap_or(now) - now).max(0.0);
            info!(uid = %block.uid, sleep_secs, "block is sleeping");
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            return RunOutcome::empty();
        }

        let Some(callback_url) = block.callback_url.clone() else {
            info!(uid = %block.uid, "block has no callback_url, skipping");
            return RunOutcome::empty();
        };

        let adapter = match Adapter::for_block(&block, self.http.clone(), self.tunables.clone()) {
            Ok(a) => a,
            Err(e) => {
                warn!(uid = %block.uid, error = %e, "adapter construction failed, skipping block");
                return RunOutcome::empty();
            }
        };

        let state = adapter.set_state(adapter.state_from_block(&block));
        let mut stream = adapter.crawl(state);

        let mut records = Vec::new();
        while let Some(chunk) = stream.next().await {
            if chunk.ok {
                records.extend(chunk.records);
            } else {
                warn!(uid = %block.uid, "chunk failed, continuing block without its records");
            }
        }

        info!(uid = %block.uid, count = records.len(), "block finished");
        RunOutcome { records, callback_url: Some(callback_url) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HostingService;
    use crate::config::Tunables;
    use std::collections::HashMap;

    fn base_block() -> BlockDescriptor {
        BlockDescriptor {
            uid: "blk-1".to_string(),
            status: BlockStatus::Ready,
            retry_at: None,
            attempts_at: None,
            from_id: Some(0),
            to_id: -1,
            ids: vec![],
            callback_url: None,
            hosting_service: HostingService {
                hoster_type: crate::block::HosterType::Gitea,
                api_url: "https://example.org".to_string(),
                api_key: None,
                crawler_request_headers: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn missing_callback_url_skips_without_adapter_work() {
        let runner = BlockRunner::new(CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5), Tunables::default());
        let outcome = runner.run(base_block()).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.callback_url.is_none());
    }

    #[tokio::test]
    async fn sleep_status_returns_empty_without_callback() {
        let mut block = base_block();
        block.status = BlockStatus::Sleep;
        block.retry_at = Some(chrono::Utc::now().timestamp() as f64);
        block.callback_url = Some("http://cb/1".to_string());
        let runner = BlockRunner::new(CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5), Tunables::default());
        let outcome = runner.run(block).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.callback_url.is_none());
    }
}
