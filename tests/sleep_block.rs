use repo_crawler_worker::block::{BlockDescriptor, BlockStatus, HostingService, HosterType};
use repo_crawler_worker::config::Tunables;
use repo_crawler_worker::http_client::CrawlerHttpClient;
use repo_crawler_worker::runner::BlockRunner;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// S5: a sleep-status block produces no records and no callback URL, and
/// the runner itself performs the `retry_at - now` sleep.
#[tokio::test]
async fn s5_sleep_block_skips_callback_and_sleeps_at_least_two_seconds() {
    let block = BlockDescriptor {
        uid: "blk-sleep".to_string(),
        status: BlockStatus::Sleep,
        retry_at: Some((chrono::Utc::now().timestamp() + 2) as f64),
        attempts_at: None,
        from_id: None,
        to_id: -1,
        ids: vec![],
        callback_url: Some("http://cb/1".to_string()),
        hosting_service: HostingService {
            hoster_type: HosterType::Gitea,
            api_url: "https://example.org".to_string(),
            api_key: None,
            crawler_request_headers: HashMap::new(),
        },
    };

    let runner = BlockRunner::new(CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5), Tunables::default());

    let started = Instant::now();
    let outcome = runner.run(block).await;
    let elapsed = started.elapsed();

    assert!(outcome.records.is_empty());
    assert!(outcome.callback_url.is_none());
    assert!(elapsed >= Duration::from_secs(2), "expected at least a 2s sleep, got {elapsed:?}");
}
