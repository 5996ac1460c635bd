use thiserror::Error;

/// Errors surfaced by the HTTP client wrapper, after retries are exhausted.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("transport error talking to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

impl HttpError {
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 429 | 500 | 502 | 503 | 504)
    }
}

/// Errors an adapter can raise. Only `Config` is fatal at construction time;
/// everything else is recovered internally or turned into a failed `Chunk`
/// by the adapter itself (see `crate::block::Chunk`) — rate limiting and
/// abuse detection are handled inline with a sleep-and-retry, never by
/// returning an error value.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("adapter misconfigured: {0}")]
    Config(String),
    #[error("could not parse hoster response: {0}")]
    Parse(String),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Errors fatal to the worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("indexer unreachable after repeated failures")]
    IndexerUnreachable,
    #[error("configuration error: {0}")]
    Config(String),
}
