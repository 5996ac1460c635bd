use crate::errors::HttpError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Pooled, retrying HTTP client shared across calls within one worker.
/// Generalizes the `reqwest::Client::builder().default_headers(..)
/// .timeout(..)` construction seen throughout `news-indexer`'s binaries
/// into a reusable wrapper with bounded exponential-backoff retries, the
/// Rust equivalent of the source crawler's
/// `urllib3.Retry(total=3, backoff_factor=10,
/// status_forcelist=[429, 500, 502, 503, 504])`.
#[derive(Clone)]
pub struct CrawlerHttpClient {
    client: reqwest::Client,
    user_agent: String,
    auth_header: Option<String>,
    machine_id: Option<String>,
    max_retries: u32,
    backoff_base_secs: u64,
    default_timeout: Duration,
}

impl CrawlerHttpClient {
    pub fn new(
        user_agent: String,
        auth_header: Option<String>,
        machine_id: Option<String>,
        max_retries: u32,
        backoff_base_secs: u64,
        default_timeout_secs: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent,
            auth_header,
            machine_id,
            max_retries,
            backoff_base_secs,
            default_timeout: Duration::from_secs(default_timeout_secs),
        }
    }

    fn build_request(
        &self,
        method: reqwest::Method,
        url: &str,
        timeout: Option<Duration>,
        extra_headers: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        let request_id = match &self.machine_id {
            Some(machine_id) => format!("{machine_id}-{}", uuid::Uuid::new_v4()),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let mut builder = self
            .client
            .request(method, url)
            .timeout(timeout.unwrap_or(self.default_timeout))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header("X-Request-Id", request_id);
        if let Some(auth) = &self.auth_header {
            builder = builder.header(reqwest::header::AUTHORIZATION, auth);
        }
        for (k, v) in extra_headers {
            builder = builder.header(k, v);
        }
        builder
    }

    async fn send_with_retries(
        &self,
        mut builder_fn: impl FnMut() -> reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, HttpError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = builder_fn();
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || status.as_u16() == 403 {
                        // 403 is returned as-is: adapters (GitHub abuse
                        // detection) decide how to react, it is not a
                        // transport-layer retry condition.
                        return Ok(resp);
                    }
                    if HttpError::is_retryable_status(status.as_u16()) && attempt <= self.max_retries {
                        let wait = Duration::from_secs(self.backoff_base_secs * attempt as u64);
                        warn!(url, status = status.as_u16(), attempt, wait_secs = wait.as_secs(), "retrying after transient status");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    return Err(HttpError::Status { url: url.to_string(), status: status.as_u16(), body });
                }
                Err(e) => {
                    if attempt <= self.max_retries {
                        let wait = Duration::from_secs(self.backoff_base_secs * attempt as u64);
                        warn!(url, attempt, wait_secs = wait.as_secs(), error = %e, "retrying after transport error");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(HttpError::Transport { url: url.to_string(), source: e });
                }
            }
        }
    }

    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        extra_headers: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, HttpError> {
        info!(url, "GET");
        self.send_with_retries(
            || self.build_request(reqwest::Method::GET, url, timeout, extra_headers).query(query),
            url,
        )
        .await
    }

    pub async fn post(
        &self,
        url: &str,
        json: &serde_json::Value,
        extra_headers: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, HttpError> {
        info!(url, "POST");
        self.send_with_retries(
            || self.build_request(reqwest::Method::POST, url, timeout, extra_headers).json(json),
            url,
        )
        .await
    }

    pub async fn put(
        &self,
        url: &str,
        json: &serde_json::Value,
        extra_headers: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, HttpError> {
        info!(url, "PUT");
        self.send_with_retries(
            || self.build_request(reqwest::Method::PUT, url, timeout, extra_headers).json(json),
            url,
        )
        .await
    }

    /// A form-encoded POST, used only by the Bitbucket OAuth token
    /// exchange (`grant_type=client_credentials`).
    pub async fn post_form_basic_auth(
        &self,
        url: &str,
        form: &[(&str, &str)],
        username: &str,
        password: &str,
    ) -> Result<reqwest::Response, HttpError> {
        info!(url, "POST form (basic auth)");
        let empty = HashMap::new();
        self.send_with_retries(
            || {
                self.build_request(reqwest::Method::POST, url, None, &empty)
                    .form(form)
                    .basic_auth(username, Some(password))
            },
            url,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_set_matches_spec() {
        for code in [429, 500, 502, 503, 504] {
            assert!(HttpError::is_retryable_status(code));
        }
        for code in [400, 401, 403, 404, 422] {
            assert!(!HttpError::is_retryable_status(code));
        }
    }
}
