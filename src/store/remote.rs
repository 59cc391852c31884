use super::{Backend, BackendKind, Document, PartitionKey, StoreError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Hosted JSON document service, one document per partition.
pub struct RemoteBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    revision: i64,
    body: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest<'a> {
    expected_revision: Option<i64>,
    body: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    revision: i64,
}

impl RemoteBackend {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Backend(format!("http client: {e}")))?;
        Ok(RemoteBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn document_url(&self, key: &PartitionKey) -> String {
        format!("{}/v1/documents/{}", self.base_url, key)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Unavailable("document service timed out".to_string())
    } else {
        StoreError::Unavailable(format!("document service unreachable: {e}"))
    }
}

fn status_error(status: StatusCode) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StoreError::Unavailable(format!("document service rejected credentials ({status})"))
        }
        _ => StoreError::Unavailable(format!("document service returned {status}")),
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn fetch(&self, key: &PartitionKey) -> Result<Option<Document>, StoreError> {
        let url = self.document_url(key);
        debug!(%url, "fetching document");
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let parsed: FetchResponse = resp.json().await.map_err(|e| StoreError::Corrupt {
                    partition: key.to_string(),
                    message: e.to_string(),
                })?;
                Ok(Some(Document {
                    revision: parsed.revision,
                    body: parsed.body,
                }))
            }
            s => Err(status_error(s)),
        }
    }

    async fn store(
        &self,
        key: &PartitionKey,
        body: serde_json::Value,
        expected: Option<i64>,
    ) -> Result<i64, StoreError> {
        let url = self.document_url(key);
        let payload = PutRequest {
            expected_revision: expected,
            body: &body,
        };
        let resp = self
            .authorize(self.client.put(&url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(StoreError::Conflict(key.to_string()))
            }
            s if s.is_success() => {
                let parsed: PutResponse = resp
                    .json()
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("bad store reply: {e}")))?;
                Ok(parsed.revision)
            }
            s => Err(status_error(s)),
        }
    }
}
