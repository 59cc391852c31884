//! Record Store: partitioned documents behind one async contract.
//!
//! Every mutation goes through [`RecordStore::update`], which holds the
//! partition's writer lock across load, mutate and save, and re-applies the
//! mutation when a backend shared with another process reports a revision
//! conflict.

pub mod local;
pub mod ops;
pub mod remote;
pub mod snapshot;

use crate::session::TenantSession;
use async_trait::async_trait;
use snapshot::{Directory, Snapshot};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

pub use ops::MarkOutcome;

const MAX_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("concurrent update conflict on {0}")]
    Conflict(String),

    #[error("stored document {partition} is corrupt: {message}")]
    Corrupt { partition: String, message: String },

    #[error("unknown student: {0}")]
    UnknownStudent(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("class {class_id} has no section {section}")]
    UnknownSection { class_id: String, section: String },

    #[error("no fee record for student {0}")]
    NoFeeRecord(String),

    #[error("handle already registered: {0}")]
    HandleTaken(String),

    #[error("class {class_id} is referenced by {students} students and {fee_structures} fee structures")]
    ClassInUse {
        class_id: String,
        students: usize,
        fee_structures: usize,
    },

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Failures the operator can retry without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Directory,
    Tenant(String),
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Directory => write!(f, "directory"),
            PartitionKey::Tenant(id) => write!(f, "tenant/{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub revision: i64,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn fetch(&self, key: &PartitionKey) -> Result<Option<Document>, StoreError>;

    /// Stores `body` when the current revision equals `expected` (None = never
    /// written) and returns the new revision; otherwise `StoreError::Conflict`.
    async fn store(
        &self,
        key: &PartitionKey,
        body: serde_json::Value,
        expected: Option<i64>,
    ) -> Result<i64, StoreError>;
}

trait PartitionDoc: Sized {
    fn fresh() -> Self;
    fn decode(body: &serde_json::Value) -> Result<Self, serde_json::Error>;
    fn encode(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl PartitionDoc for Snapshot {
    fn fresh() -> Self {
        Snapshot::seeded()
    }
    fn decode(body: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Snapshot::from_json(body)
    }
    fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.to_json()
    }
}

impl PartitionDoc for Directory {
    fn fresh() -> Self {
        Directory::default()
    }
    fn decode(body: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Directory::from_json(body)
    }
    fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.to_json()
    }
}

pub struct RecordStore {
    backend: Arc<dyn Backend>,
    writers: Mutex<HashMap<PartitionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        RecordStore {
            backend,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    fn writer(&self, key: &PartitionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|p| p.into_inner());
        writers.entry(key.clone()).or_default().clone()
    }

    async fn read<D: PartitionDoc>(&self, key: &PartitionKey) -> Result<(D, Option<i64>), StoreError> {
        match self.backend.fetch(key).await? {
            None => Ok((D::fresh(), None)),
            Some(doc) => {
                let parsed = D::decode(&doc.body).map_err(|e| StoreError::Corrupt {
                    partition: key.to_string(),
                    message: e.to_string(),
                })?;
                Ok((parsed, Some(doc.revision)))
            }
        }
    }

    async fn update_doc<D, T, E, F>(&self, key: PartitionKey, mut mutate: F) -> Result<T, E>
    where
        D: PartitionDoc,
        E: From<StoreError>,
        F: FnMut(&mut D) -> Result<T, E>,
    {
        let lock = self.writer(&key);
        let _guard = lock.lock().await;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let (mut doc, revision) = self.read::<D>(&key).await?;
            let out = mutate(&mut doc)?;
            let body = doc
                .encode()
                .map_err(|e| StoreError::Invalid(e.to_string()))?;
            match self.backend.store(&key, body, revision).await {
                Ok(next) => {
                    debug!(partition = %key, revision = next, "partition saved");
                    return Ok(out);
                }
                Err(StoreError::Conflict(p)) if attempt < MAX_UPDATE_ATTEMPTS => {
                    warn!(partition = %p, attempt, "revision conflict; re-applying update");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(key.to_string()).into())
    }

    pub async fn load(&self, session: &TenantSession) -> Result<Snapshot, StoreError> {
        let (snap, _) = self.read::<Snapshot>(&session.partition()).await?;
        Ok(snap)
    }

    /// Replaces the whole tenant snapshot.
    pub async fn save(&self, session: &TenantSession, snapshot: &Snapshot) -> Result<(), StoreError> {
        let replacement = snapshot.clone();
        self.update(session, move |snap: &mut Snapshot| {
            *snap = replacement.clone();
            Ok::<_, StoreError>(())
        })
        .await
    }

    pub async fn update<T, E, F>(&self, session: &TenantSession, mutate: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnMut(&mut Snapshot) -> Result<T, E>,
    {
        self.update_doc::<Snapshot, T, E, F>(session.partition(), mutate)
            .await
    }

    pub async fn load_directory(&self) -> Result<Directory, StoreError> {
        let (dir, _) = self.read::<Directory>(&PartitionKey::Directory).await?;
        Ok(dir)
    }

    pub async fn update_directory<T, E, F>(&self, mutate: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnMut(&mut Directory) -> Result<T, E>,
    {
        self.update_doc::<Directory, T, E, F>(PartitionKey::Directory, mutate)
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::local::LocalBackend;
    use super::*;
    use crate::session::TenantSession;

    pub fn memory_store() -> Arc<RecordStore> {
        let backend = LocalBackend::in_memory().expect("in-memory backend");
        Arc::new(RecordStore::new(Arc::new(backend)))
    }

    pub fn session(id: &str) -> TenantSession {
        TenantSession {
            tenant_id: id.to_string(),
            school_name: format!("School {}", id),
            handle: format!("{}-admin", id),
        }
    }
}
