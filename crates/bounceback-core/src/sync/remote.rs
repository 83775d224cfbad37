//! Remote sync API
//!
//! The engine consumes a conventional request/response API: `push` a batch
//! of operations and receive per-operation acks, `pull` per-kind deltas
//! since a cursor timestamp. The server deduplicates pushes by operation
//! id, which is what makes retries after lost acks safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::RecordKind;
use crate::queue::QueueEntry;

/// One operation in a push batch, as sent on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOperation {
    /// Queue operation id; the server's idempotency key
    pub id: String,
    pub kind: RecordKind,
    pub record_id: String,
    /// `create` | `update` | `delete`
    pub operation: String,
    /// Full column map (minus engine-owned sync state)
    pub payload: Value,
}

impl PushOperation {
    #[must_use]
    pub fn from_entry(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id.clone(),
            kind: entry.kind,
            record_id: entry.record_id.clone(),
            operation: entry.operation.as_str().to_string(),
            payload: entry.payload.clone(),
        }
    }
}

/// Per-operation outcome of a push
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AckOutcome {
    /// The server applied (or had already applied) the operation
    Applied,
    /// The server refused the operation; retrying won't help
    Rejected { code: u16, message: String },
}

/// Acknowledgement for one pushed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAck {
    pub operation_id: String,
    #[serde(flatten)]
    pub outcome: AckOutcome,
}

/// Server-side changes for one record kind since a cursor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullDelta {
    /// Full column maps of records created since the cursor
    #[serde(default)]
    pub created: Vec<Value>,
    /// Full column maps of records updated since the cursor
    #[serde(default)]
    pub updated: Vec<Value>,
    /// Ids of records deleted since the cursor
    #[serde(default)]
    pub deleted_ids: Vec<String>,
    /// Server timestamp to persist as the next cursor
    pub server_timestamp: i64,
}

impl PullDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted_ids.is_empty()
    }
}

/// The remote reconciliation endpoint the engine drains to and pulls from
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Send a batch of operations; returns one ack per operation
    async fn push(&self, operations: &[PushOperation]) -> Result<Vec<PushAck>>;

    /// Fetch changes for one kind since the given cursor
    async fn pull(&self, kind: RecordKind, since: Option<i64>) -> Result<PullDelta>;
}

/// HTTP implementation over the app backend
#[derive(Clone)]
pub struct HttpRemoteApi {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteApi {
    /// Build a client for the given endpoint, bounding every request with
    /// the supplied timeout
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        Ok(Self {
            endpoint,
            auth_token: None,
            client,
        })
    }

    /// Attach a bearer token to every request
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::ServerRejected {
            code: status.as_u16(),
            message: parse_api_error(&body, status.as_u16()),
        })
    }
}

impl std::fmt::Debug for HttpRemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteApi")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    operations: &'a [PushOperation],
}

#[derive(Deserialize)]
struct PushResponse {
    acks: Vec<PushAck>,
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn push(&self, operations: &[PushOperation]) -> Result<Vec<PushAck>> {
        let request = self
            .authorize(self.client.post(format!("{}/sync/push", self.endpoint)))
            .json(&PushRequest { operations });

        let response = request.send().await.map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;
        let payload: PushResponse = response.json().await.map_err(map_transport_error)?;
        Ok(payload.acks)
    }

    async fn pull(&self, kind: RecordKind, since: Option<i64>) -> Result<PullDelta> {
        let mut request = self
            .authorize(self.client.get(format!("{}/sync/pull", self.endpoint)))
            .query(&[("kind", kind.as_str())]);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_string())]);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;
        response.json().await.map_err(map_transport_error)
    }
}

fn map_transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::RequestTimeout
    } else if error.is_connect() {
        Error::NetworkUnavailable
    } else {
        Error::ServerRejected {
            code: error.status().map_or(0, |s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(body: &str, status: u16) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed.chars().take(180).collect()
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput("endpoint must not be empty".into()));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn ack_wire_format_roundtrip() {
        let applied: PushAck =
            serde_json::from_value(json!({"operation_id": "op-1", "status": "applied"})).unwrap();
        assert!(matches!(applied.outcome, AckOutcome::Applied));

        let rejected: PushAck = serde_json::from_value(json!({
            "operation_id": "op-2",
            "status": "rejected",
            "code": 422,
            "message": "bad payload"
        }))
        .unwrap();
        match rejected.outcome {
            AckOutcome::Rejected { code, .. } => assert_eq!(code, 422),
            AckOutcome::Applied => panic!("expected rejection"),
        }
    }

    #[test]
    fn pull_delta_defaults_are_empty() {
        let delta: PullDelta =
            serde_json::from_value(json!({"server_timestamp": 17})).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.server_timestamp, 17);
    }

    #[test]
    fn api_error_prefers_structured_message() {
        assert_eq!(
            parse_api_error("{\"message\": \" schema mismatch \"}", 409),
            "schema mismatch"
        );
        assert_eq!(parse_api_error("", 502), "HTTP 502");
    }

    #[test]
    fn debug_redacts_auth_token() {
        let api = HttpRemoteApi::new("https://api.example.com", std::time::Duration::from_secs(5))
            .unwrap()
            .with_auth_token("secret-token");
        let debug = format!("{api:?}");
        assert!(!debug.contains("secret-token"));
    }
}
