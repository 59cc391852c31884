use super::{Backend, BackendKind, Document, PartitionKey, StoreError};
use crate::db::{self, PutOutcome};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Embedded backend over the workspace database's `documents` table.
#[derive(Clone)]
pub struct LocalBackend {
    conn: Arc<Mutex<Connection>>,
}

impl LocalBackend {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        LocalBackend { conn }
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(LocalBackend::new(Arc::new(Mutex::new(db::open_in_memory()?))))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn fetch(&self, key: &PartitionKey) -> Result<Option<Document>, StoreError> {
        let partition = key.to_string();
        self.with_conn(move |conn| {
            let Some(stored) = db::document_get(conn, &partition)
                .map_err(|e| StoreError::Backend(e.to_string()))?
            else {
                return Ok(None);
            };
            let body = serde_json::from_str(&stored.body).map_err(|e| StoreError::Corrupt {
                partition: partition.clone(),
                message: e.to_string(),
            })?;
            Ok(Some(Document {
                revision: stored.revision,
                body,
            }))
        })
        .await
    }

    async fn store(
        &self,
        key: &PartitionKey,
        body: serde_json::Value,
        expected: Option<i64>,
    ) -> Result<i64, StoreError> {
        let partition = key.to_string();
        let text = serde_json::to_string(&body).map_err(|e| StoreError::Invalid(e.to_string()))?;
        self.with_conn(move |conn| {
            match db::document_put(conn, &partition, &text, expected)
                .map_err(|e| StoreError::Backend(e.to_string()))?
            {
                PutOutcome::Stored(rev) => Ok(rev),
                PutOutcome::Conflict { .. } => Err(StoreError::Conflict(partition.clone())),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unparsable_body_is_corrupt_not_reseeded() {
        let backend = LocalBackend::in_memory().expect("backend");
        {
            let mut conn = backend.conn.lock().expect("lock");
            db::document_put(&mut conn, "tenant/t1", "{not json", None).expect("raw put");
        }
        let err = backend
            .fetch(&PartitionKey::Tenant("t1".into()))
            .await
            .expect_err("corrupt");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn store_then_fetch_returns_revision() {
        let backend = LocalBackend::in_memory().expect("backend");
        let key = PartitionKey::Directory;
        let rev = backend
            .store(&key, json!({ "schools": [] }), None)
            .await
            .expect("store");
        assert_eq!(rev, 1);
        let doc = backend.fetch(&key).await.expect("fetch").expect("doc");
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.body, json!({ "schools": [] }));

        let stale = backend.store(&key, json!({}), None).await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
    }
}
