use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A block's status as reported by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Ready,
    Sleep,
}

impl Default for BlockStatus {
    fn default() -> Self {
        BlockStatus::Ready
    }
}

/// The hoster types known to this crate's adapter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HosterType {
    Github,
    Gitea,
    Gitlab,
    Bitbucket,
}

/// Credential shapes an adapter may need. Represented as a tagged enum so
/// construction can fail fast with `AdapterError::Config` when a required
/// variant is missing, rather than at first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Bearer { token: String },
    Basic { username: String, password: String },
    OAuthClientCredentials { client_id: String, client_secret: String },
}

/// Nested hoster descriptor inside a `BlockDescriptor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingService {
    #[serde(rename = "type")]
    pub hoster_type: HosterType,
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<Value>,
    #[serde(default)]
    pub crawler_request_headers: HashMap<String, String>,
}

impl HostingService {
    /// Interpret `api_key` as a `Credential`, per adapter-specific rules.
    /// `None`/absent is a valid result: some adapters (Gitea, anonymous
    /// GitLab) work without a credential.
    pub fn credential(&self) -> Result<Option<Credential>, String> {
        let Some(raw) = &self.api_key else {
            return Ok(None);
        };
        match self.hoster_type {
            HosterType::Github => {
                let token = raw
                    .as_str()
                    .ok_or_else(|| "github api_key must be a bearer token string".to_string())?;
                Ok(Some(Credential::Bearer { token: token.to_string() }))
            }
            HosterType::Bitbucket => {
                let client_id = raw
                    .get("client_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "bitbucket api_key requires client_id".to_string())?;
                let client_secret = raw
                    .get("client_secret")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "bitbucket api_key requires client_secret".to_string())?;
                Ok(Some(Credential::OAuthClientCredentials {
                    client_id: client_id.to_string(),
                    client_secret: client_secret.to_string(),
                }))
            }
            HosterType::Gitlab => {
                let token = raw
                    .as_str()
                    .ok_or_else(|| "gitlab api_key must be a PRIVATE-TOKEN string".to_string())?;
                Ok(Some(Credential::Bearer { token: token.to_string() }))
            }
            HosterType::Gitea => {
                if let Some(token) = raw.as_str() {
                    Ok(Some(Credential::Bearer { token: token.to_string() }))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// A unit of work handed out by the indexer. Field names match the source
/// crawler's job schema (`uid`, `from_id`, `to_id`, `ids`, `callback_url`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub uid: String,
    #[serde(default)]
    pub status: BlockStatus,
    /// Present when `status == sleep`; absolute epoch seconds.
    #[serde(default)]
    pub retry_at: Option<f64>,
    /// Read but not acted on here; the indexer owns it.
    #[serde(default)]
    pub attempts_at: Option<f64>,
    #[serde(default)]
    pub from_id: Option<i64>,
    #[serde(default = "default_to_id")]
    pub to_id: i64,
    #[serde(default)]
    pub ids: Vec<i64>,
    #[serde(default)]
    pub callback_url: Option<String>,
    pub hosting_service: HostingService,
}

fn default_to_id() -> i64 {
    -1
}

impl BlockDescriptor {
    pub fn has_bounded_range(&self) -> bool {
        self.to_id != -1
    }
}

/// Opaque, JSON-serializable per-adapter progress cursor. Adapters agree on
/// a private set of keys; the runner only ever passes this through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterState(pub serde_json::Map<String, Value>);

impl AdapterState {
    pub fn new() -> Self {
        Self(serde_json::Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }
}

/// A repository as returned by the hoster API, passed through verbatim.
/// The indexer handles cross-hoster canonicalization; this crate only
/// needs records to stay ordered.
pub type RepositoryRecord = Value;

/// One step of an adapter's iteration.
///
/// `state = None` is the sentinel used by adapters (Bitbucket, on `next`
/// exhaustion) to signal "this block is finished, discard the cursor" —
/// it never round-trips anywhere outside the in-memory block run: the
/// runner does not persist `AdapterState` to the indexer (spec.md §9).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub ok: bool,
    pub records: Vec<RepositoryRecord>,
    pub state: Option<AdapterState>,
}

impl Chunk {
    pub fn success(records: Vec<RepositoryRecord>, state: AdapterState) -> Self {
        Self { ok: true, records, state: Some(state) }
    }

    pub fn success_done(records: Vec<RepositoryRecord>) -> Self {
        Self { ok: true, records, state: None }
    }

    pub fn failure(state: AdapterState) -> Self {
        Self { ok: false, records: Vec::new(), state: Some(state) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_descriptor_deserializes_minimal_ready_block() {
        let json = serde_json::json!({
            "uid": "abc",
            "from_id": 0,
            "to_id": -1,
            "ids": [1, 2, 3],
            "callback_url": "http://cb/1",
            "hosting_service": {
                "type": "github",
                "api_url": "https://api.github.com",
                "api_key": "tok",
            }
        });
        let block: BlockDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(block.status, BlockStatus::Ready);
        assert_eq!(block.ids, vec![1, 2, 3]);
        assert!(!block.has_bounded_range());
    }

    #[test]
    fn sleep_block_carries_retry_at() {
        let json = serde_json::json!({
            "uid": "abc",
            "status": "sleep",
            "retry_at": 123.0,
            "to_id": -1,
            "hosting_service": {
                "type": "gitea",
                "api_url": "https://example.org",
            }
        });
        let block: BlockDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(block.status, BlockStatus::Sleep);
        assert_eq!(block.retry_at, Some(123.0));
    }

    #[test]
    fn github_credential_requires_string_token() {
        let service = HostingService {
            hoster_type: HosterType::Github,
            api_url: "https://api.github.com".into(),
            api_key: Some(Value::String("tok".into())),
            crawler_request_headers: HashMap::new(),
        };
        matches!(service.credential().unwrap(), Some(Credential::Bearer { .. }));
    }
}
