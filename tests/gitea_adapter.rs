use repo_crawler_worker::block::{BlockDescriptor, BlockStatus, HostingService, HosterType};
use repo_crawler_worker::config::Tunables;
use repo_crawler_worker::http_client::CrawlerHttpClient;
use repo_crawler_worker::runner::BlockRunner;
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gitea_block(api_url: String) -> BlockDescriptor {
    BlockDescriptor {
        uid: "blk-gitea".to_string(),
        status: BlockStatus::Ready,
        retry_at: None,
        attempts_at: None,
        from_id: None,
        to_id: -1,
        ids: vec![],
        callback_url: Some("http://cb/1".to_string()),
        hosting_service: HostingService {
            hoster_type: HosterType::Gitea,
            api_url,
            api_key: None,
            crawler_request_headers: HashMap::new(),
        },
    }
}

fn repos(n: usize, start: usize) -> Vec<serde_json::Value> {
    (start..start + n).map(|i| json!({"id": i, "name": format!("repo-{i}")})).collect()
}

/// S3: page 1 returns 50 records, page 2 returns 7; aggregate is 57 and
/// the adapter stops after the short second page.
#[tokio::test]
async fn s3_gitea_terminates_after_short_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/search"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": repos(50, 0)})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": repos(7, 50)})))
        .mount(&server)
        .await;

    let http = CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5);
    let tunables = Tunables { default_throttle_ms: 0, ..Tunables::default() };
    let runner = BlockRunner::new(http, tunables);
    let outcome = runner.run(gitea_block(server.uri())).await;

    assert_eq!(outcome.records.len(), 57);
}
