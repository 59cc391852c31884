//! Tenant session boundary.
//!
//! A [`TenantSession`] is created by a successful login or registration and
//! handed to every workflow entry point. The currently signed-in tenant is
//! remembered in the workspace `settings` table so a restarted sidecar can
//! resume it.

use crate::db;
use crate::model::School;
use crate::store::{PartitionKey, RecordStore, StoreError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

const SESSION_KEY: &str = "session.current";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSession {
    pub tenant_id: String,
    pub school_name: String,
    pub handle: String,
}

impl TenantSession {
    pub fn from_school(school: &School) -> Self {
        TenantSession {
            tenant_id: school.id.clone(),
            school_name: school.school_name.clone(),
            handle: school.handle.clone(),
        }
    }

    pub fn partition(&self) -> PartitionKey {
        PartitionKey::Tenant(self.tenant_id.clone())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid handle or secret")]
    InvalidCredentials,

    #[error("handle already registered: {0}")]
    HandleTaken(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session marker: {0}")]
    Marker(String),
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub school_name: String,
    pub handle: String,
    pub secret: String,
    pub address: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

/// Unsalted SHA-256 hex; comparison strength equals the secret itself.
pub fn secret_digest(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn non_empty(value: &str, field: &str) -> Result<String, SessionError> {
    let t = value.trim();
    if t.is_empty() {
        return Err(SessionError::Validation(format!("{} must not be empty", field)));
    }
    Ok(t.to_string())
}

pub async fn register(store: &RecordStore, reg: Registration) -> Result<TenantSession, SessionError> {
    let school_name = non_empty(&reg.school_name, "schoolName")?;
    let handle = non_empty(&reg.handle, "handle")?;
    if reg.secret.is_empty() {
        return Err(SessionError::Validation("secret must not be empty".into()));
    }

    let school = School {
        id: uuid::Uuid::new_v4().simple().to_string(),
        school_name,
        handle,
        secret_digest: secret_digest(&reg.secret),
        address: reg.address.filter(|s| !s.trim().is_empty()),
        contact_email: reg.contact_email.filter(|s| !s.trim().is_empty()),
        contact_phone: reg.contact_phone.filter(|s| !s.trim().is_empty()),
        created_at: Some(chrono::Utc::now().to_rfc3339()),
    };

    match store.register_tenant(school).await {
        Ok(stored) => {
            info!(tenant = %stored.id, handle = %stored.handle, "tenant registered");
            Ok(TenantSession::from_school(&stored))
        }
        Err(StoreError::HandleTaken(h)) => Err(SessionError::HandleTaken(h)),
        Err(e) => Err(e.into()),
    }
}

pub async fn login(store: &RecordStore, handle: &str, secret: &str) -> Result<TenantSession, SessionError> {
    let dir = store.load_directory().await?;
    let digest = secret_digest(secret);
    match dir.by_handle(handle.trim()) {
        Some(school) if school.secret_digest == digest => {
            info!(tenant = %school.id, "tenant signed in");
            Ok(TenantSession::from_school(school))
        }
        _ => Err(SessionError::InvalidCredentials),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMarker {
    tenant_id: String,
    handle: String,
    since: String,
}

pub fn persist_marker(conn: &Connection, session: Option<&TenantSession>) -> Result<(), SessionError> {
    let res = match session {
        Some(s) => {
            let marker = SessionMarker {
                tenant_id: s.tenant_id.clone(),
                handle: s.handle.clone(),
                since: chrono::Utc::now().to_rfc3339(),
            };
            serde_json::to_value(&marker)
                .map_err(anyhow::Error::from)
                .and_then(|v| db::settings_set_json(conn, SESSION_KEY, &v))
        }
        None => db::settings_delete(conn, SESSION_KEY),
    };
    res.map_err(|e| SessionError::Marker(e.to_string()))
}

fn read_marker(conn: &Connection) -> Result<Option<SessionMarker>, SessionError> {
    let raw = db::settings_get_json(conn, SESSION_KEY).map_err(|e| SessionError::Marker(e.to_string()))?;
    match raw {
        None => Ok(None),
        Some(v) => match serde_json::from_value(v) {
            Ok(m) => Ok(Some(m)),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable session marker");
                Ok(None)
            }
        },
    }
}

/// Resumes the remembered tenant if it is still registered.
pub async fn restore(
    store: &RecordStore,
    conn: &std::sync::Mutex<Connection>,
) -> Result<Option<TenantSession>, SessionError> {
    let marker = {
        let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
        read_marker(&guard)?
    };
    let Some(marker) = marker else {
        return Ok(None);
    };
    let dir = store.load_directory().await?;
    match dir.by_id(&marker.tenant_id) {
        Some(school) => Ok(Some(TenantSession::from_school(school))),
        None => {
            warn!(tenant = %marker.tenant_id, "remembered tenant no longer exists");
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            persist_marker(&guard, None)?;
            Ok(None)
        }
    }
}
