use futures_util::StreamExt;
use repo_crawler_worker::adapters::bitbucket::BitbucketAdapter;
use repo_crawler_worker::block::{AdapterState, BlockDescriptor, BlockStatus, HostingService, HosterType};
use repo_crawler_worker::config::Tunables;
use repo_crawler_worker::http_client::CrawlerHttpClient;
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bitbucket_block(api_url: String) -> BlockDescriptor {
    BlockDescriptor {
        uid: "blk-bitbucket".to_string(),
        status: BlockStatus::Ready,
        retry_at: None,
        attempts_at: None,
        from_id: None,
        to_id: -1,
        ids: vec![],
        callback_url: Some("http://cb/1".to_string()),
        hosting_service: HostingService {
            hoster_type: HosterType::Bitbucket,
            api_url,
            api_key: Some(json!({"client_id": "id", "client_secret": "secret"})),
            crawler_request_headers: HashMap::new(),
        },
    }
}

/// S6: the first page triggers a token POST; once the cached token's
/// `expires_in` has actually elapsed, fetching the next page triggers a
/// second token POST.
#[tokio::test]
async fn s6_bitbucket_refetches_token_after_expiry() {
    let server = MockServer::start().await;
    std::env::set_var("BITBUCKET_OAUTH_URL", format!("{}/site/oauth2/access_token", server.uri()));

    Mock::given(method("POST"))
        .and(path("/site/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok", "expires_in": 1})))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/2.0/repositories/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{"uuid": "repo-1"}],
            "next": format!("{}/2.0/repositories/?page=2", server.uri()),
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2.0/repositories/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": [{"uuid": "repo-2"}]})))
        .mount(&server)
        .await;

    let http = CrawlerHttpClient::new("ua".to_string(), None, None, 0, 1, 5);
    let tunables = Tunables { default_throttle_ms: 1500, ..Tunables::default() };
    let block = bitbucket_block(server.uri());
    let adapter = BitbucketAdapter::new(&block, http, tunables).unwrap();

    let mut stream = adapter.crawl(adapter.state_from_block(&block));
    let mut records = Vec::new();
    while let Some(chunk) = stream.next().await {
        records.extend(chunk.records);
    }

    assert_eq!(records.len(), 2);
}

#[test]
fn has_next_true_before_first_fetch() {
    let state = AdapterState::new();
    assert!(state.get_i64("i").unwrap_or(-1) < 0);
}
