use crate::config::{self, Config};
use crate::errors::WorkerError;
use crate::http_client::CrawlerHttpClient;
use crate::indexer_client::IndexerClient;
use crate::runner::BlockRunner;
use tracing::{info, warn};

/// The three ways a worker process can be told where to pull blocks from,
/// selected by the CLI subcommand (spec.md §4.4, §6).
pub enum WorkMode {
    /// `crawl --block-url`: hit one explicit block URL repeatedly.
    BlockUrl(String),
    /// `crawl-hoster <domain>...`: resolve `/api/v1/hosters`, keep the ones
    /// whose `api_url` matches a listed domain, and cycle their block URLs.
    HosterDomains(Vec<String>),
    /// `crawl-type <platform_type>`: always hit the load-balanced endpoint
    /// for that hoster type.
    HosterType(String),
}

/// The outermost control loop (spec.md §4.4): acquire a block, run it,
/// PUT results, repeat until the cooperative stop signal or SIGINT/SIGTERM
/// is observed. Indexer-communication failures escalate to a process exit
/// after `max_errors` consecutive failures; adapter-level failures never do.
pub struct WorkerLoop {
    indexer: IndexerClient,
    runner: BlockRunner,
    mode: WorkMode,
}

impl WorkerLoop {
    pub fn new(config: &Config, mode: WorkMode) -> Self {
        let http = CrawlerHttpClient::new(
            config.user_agent.clone(),
            config.indexer_api_key.as_ref().map(|k| format!("Basic {k}")),
            config.machine_id.clone(),
            config.tunables.http_max_retries,
            config.tunables.http_retry_backoff_base_secs,
            config.tunables.http_default_timeout_secs,
        );
        let indexer = IndexerClient::new(http.clone(), config.indexer_base_url.clone(), config.tunables.max_indexer_errors);
        let runner = BlockRunner::new(http, config.tunables.clone());
        Self { indexer, runner, mode }
    }

    /// Resolve the next block URL to hit for this worker's mode. For
    /// `HosterDomains`, cycles round-robin through the matching hosters;
    /// for `HosterType`/`BlockUrl` the URL is effectively constant per call.
    async fn next_block_url(&mut self, domain_cursor: &mut usize) -> Result<Option<String>, WorkerError> {
        match &self.mode {
            WorkMode::BlockUrl(url) => Ok(Some(url.clone())),
            WorkMode::HosterType(platform_type) => Ok(Some(self.indexer.loadbalanced_block_url(platform_type))),
            WorkMode::HosterDomains(domains) => {
                let hosters = self.indexer.list_hosters().await?;
                let matching: Vec<_> = hosters.into_iter().filter(|h| domains.iter().any(|d| &h.api_url == d)).collect();
                if matching.is_empty() {
                    warn!(?domains, "no hosters matched the requested domains");
                    return Ok(None);
                }
                let idx = *domain_cursor % matching.len();
                *domain_cursor = domain_cursor.wrapping_add(1);
                Ok(Some(self.indexer.hoster_block_url(&matching[idx].id)))
            }
        }
    }

    /// Run the loop until `config::is_running_flag_set()` returns false or
    /// SIGINT/SIGTERM arrives. The current block always finishes first
    /// (cooperative cancellation, spec.md §4.4/§5).
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let mut domain_cursor = 0usize;
        loop {
            if !config::is_running_flag_set() {
                info!("running flag cleared, stopping worker loop");
                return Ok(());
            }

            let block_url = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("received interrupt signal, stopping worker loop");
                    return Ok(());
                }
                result = self.next_block_url(&mut domain_cursor) => result?,
            };

            let Some(block_url) = block_url else {
                continue;
            };

            let block = match self.indexer.fetch_block(&block_url).await? {
                Some(b) => b,
                None => continue,
            };

            let outcome = self.runner.run(block).await;

            match outcome.callback_url {
                Some(callback_url) if !outcome.records.is_empty() => {
                    let _ = self.indexer.put_callback(&callback_url, &outcome.records).await;
                }
                Some(_) => {
                    info!("block produced no records, skipping callback PUT");
                }
                None => {}
            }
        }
    }
}
