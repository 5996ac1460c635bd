use serde::Deserialize;
use std::env;

/// Non-secret defaults that may be checked into a `config.toml` and
/// overridden by environment variables. Mirrors the layering used by
/// `news-indexer`'s binaries: CLI/env wins, the file fills in the rest.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct FileConfig {
    pub general: Option<FileGeneralConfig>,
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct FileGeneralConfig {
    pub indexer_base_url: Option<String>,
    pub user_agent_suffix: Option<String>,
    pub max_indexer_errors: Option<u32>,
}

/// The crate version baked in at build time, used to build the default
/// user agent the same way the source crawler builds `HobGrebbit v{VERSION}`.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tunable constants called out explicitly in the specification rather than
/// hardcoded at their call sites.
#[derive(Clone, Debug)]
pub struct Tunables {
    /// GitHub-search/Gitea/GitLab default per-page throttle when no
    /// rate-limit signal is available.
    pub default_throttle_ms: u64,
    /// Sleep applied between a GitHub 403 ("abuse detected") and retrying
    /// the same query.
    pub github_abuse_sleep_secs: u64,
    /// Max number of abuse-retry attempts before a chunk is failed.
    pub github_abuse_retry_max: u32,
    /// Sleep applied when GitHub returns a body-level `RATE_LIMITED` error.
    pub github_ratelimit_sleep_secs: u64,
    /// `empty_page_count` threshold past which an adapter declares itself
    /// done, even with a nominally-unbounded range. Spec.md §9: documented
    /// as a tunable, not re-derived.
    pub empty_page_limit: u32,
    /// HTTP client retry count for transient status codes / transport
    /// errors.
    pub http_max_retries: u32,
    /// Base seconds for the exponential backoff: `base * attempt`.
    pub http_retry_backoff_base_secs: u64,
    /// Default per-request timeout.
    pub http_default_timeout_secs: u64,
    /// Consecutive indexer-communication failures before the worker loop
    /// exits the process.
    pub max_indexer_errors: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            default_throttle_ms: 100,
            github_abuse_sleep_secs: 5,
            github_abuse_retry_max: 5,
            github_ratelimit_sleep_secs: 60,
            empty_page_limit: 10,
            http_max_retries: 3,
            http_retry_backoff_base_secs: 10,
            http_default_timeout_secs: 30,
            max_indexer_errors: 5,
        }
    }
}

/// A single immutable configuration value, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub indexer_base_url: String,
    pub indexer_api_key: Option<String>,
    pub user_agent: String,
    pub machine_id: Option<String>,
    pub tunables: Tunables,
}

impl Config {
    /// Load configuration from environment variables, optionally layered
    /// over a `config.toml`-style file for non-secret defaults. Secrets
    /// (`INDEXER_API_KEY`) are always env-var-only.
    pub fn from_env(config_path: &str) -> Result<Self, crate::errors::WorkerError> {
        let file_cfg: Option<FileConfig> = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok());
        let file_general = file_cfg.and_then(|c| c.general);

        let indexer_base_url = env::var("INDEXER_BASE_URL")
            .ok()
            .or_else(|| file_general.as_ref().and_then(|g| g.indexer_base_url.clone()))
            .ok_or_else(|| {
                crate::errors::WorkerError::Config(
                    "INDEXER_BASE_URL must be set via env or config.general.indexer_base_url"
                        .to_string(),
                )
            })?;

        let indexer_api_key = env::var("INDEXER_API_KEY").ok().filter(|s| !s.is_empty());

        let user_agent_suffix = env::var("CRAWLER_USER_AGENT_SUFFIX")
            .ok()
            .or_else(|| file_general.as_ref().and_then(|g| g.user_agent_suffix.clone()))
            .unwrap_or_default();
        let user_agent = format!("repo-crawler-worker/{CRATE_VERSION} {user_agent_suffix}")
            .trim_end()
            .to_string();

        let machine_id = env::var("CRAWLER_MACHINE_ID").ok();

        let max_indexer_errors = env::var("MAX_INDEXER_ERRORS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or_else(|| file_general.as_ref().and_then(|g| g.max_indexer_errors))
            .unwrap_or_else(|| Tunables::default().max_indexer_errors);

        Ok(Self {
            indexer_base_url,
            indexer_api_key,
            user_agent,
            machine_id,
            tunables: Tunables {
                max_indexer_errors,
                ..Tunables::default()
            },
        })
    }
}

/// Reads the cooperative stop flag. Mirrors the source crawler's
/// `crawl_stop` command, which flips `CRAWLER_IS_RUNNING_ENV_KEY` to `"0"`
/// for the next loop iteration to observe.
pub fn is_running_flag_set() -> bool {
    match env::var("CRAWLER_IS_RUNNING") {
        Ok(v) => v != "0",
        Err(_) => true,
    }
}

pub fn clear_running_flag() {
    env::set_var("CRAWLER_IS_RUNNING", "0");
}
