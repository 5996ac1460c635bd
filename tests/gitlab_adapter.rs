use repo_crawler_worker::block::{BlockDescriptor, BlockStatus, HostingService, HosterType};
use repo_crawler_worker::config::Tunables;
use repo_crawler_worker::http_client::CrawlerHttpClient;
use repo_crawler_worker::runner::BlockRunner;
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gitlab_block(api_url: String) -> BlockDescriptor {
    BlockDescriptor {
        uid: "blk-gitlab".to_string(),
        status: BlockStatus::Ready,
        retry_at: None,
        attempts_at: None,
        from_id: None,
        to_id: -1,
        ids: vec![],
        callback_url: Some("http://cb/1".to_string()),
        hosting_service: HostingService {
            hoster_type: HosterType::Gitlab,
            api_url,
            api_key: None,
            crawler_request_headers: HashMap::new(),
        },
    }
}

/// S4: `RateLimit-Remaining: 0`, `RateLimit-Reset: now+3` forces a sleep of
/// at least 3 seconds before the next page is requested.
#[tokio::test]
async fn s4_gitlab_rate_limit_sleeps_until_reset() {
    let server = MockServer::start().await;
    let reset_at = chrono::Utc::now().timestamp() + 3;

    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("RateLimit-Remaining", "0")
                .insert_header("RateLimit-Reset", reset_at.to_string().as_str())
                .set_body_json(json!([{"id": 1, "name": "one"}])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let http = CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5);
    let tunables = Tunables { default_throttle_ms: 0, ..Tunables::default() };
    let runner = BlockRunner::new(http, tunables);

    let started = Instant::now();
    let outcome = runner.run(gitlab_block(server.uri())).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.records.len(), 1);
    assert!(elapsed >= Duration::from_secs(3), "expected rate-limit sleep of at least 3s, got {elapsed:?}");
}
