use crate::attendance::Scanner;
use crate::config::StoreBackend;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::session;
use crate::store::local::LocalBackend;
use crate::store::remote::RemoteBackend;
use crate::store::{Backend, RecordStore};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

fn health(state: &AppState) -> serde_json::Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "storeBackend": state.store.as_ref().map(|s| s.backend_kind().as_str()),
        "remoteStoreConfigured": state.config.is_remote_store_configured(),
        "providerConfigured": state.config.is_provider_configured(),
        "signedIn": state.session.is_some(),
        "matcher": state.gateway.stats(),
        "liveCaptureStreams": state.feed.live_streams(),
    })
}

fn build_backend(state: &AppState, conn: Arc<Mutex<rusqlite::Connection>>) -> Result<Arc<dyn Backend>, HandlerErr> {
    match state.config.store.backend {
        StoreBackend::Local => Ok(Arc::new(LocalBackend::new(conn))),
        StoreBackend::Remote => {
            let url = state
                .config
                .store
                .remote_url
                .as_deref()
                .ok_or_else(|| HandlerErr::new("store_unavailable", "remote store url is not configured"))?;
            let remote = RemoteBackend::new(
                url,
                state.config.store.remote_api_key.clone(),
                Duration::from_secs(state.config.store.timeout_secs),
            )?;
            Ok(Arc::new(remote))
        }
    }
}

/// Opens (or creates) the workspace database, wires the record store and
/// resumes a remembered tenant session.
pub async fn open_workspace(state: &mut AppState, path: PathBuf) -> Result<serde_json::Value, HandlerErr> {
    let conn = db::open_db(&path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    let conn = Arc::new(Mutex::new(conn));
    let backend = build_backend(state, conn.clone())?;

    state.end_tenant_work().await;
    let store = Arc::new(RecordStore::new(backend));
    state.scanner = Some(Scanner::new(
        store.clone(),
        state.gateway.clone(),
        Arc::new(state.feed.clone()),
        state.config.scanner.clone(),
    ));
    state.session = match session::restore(&store, &conn).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "could not resume remembered session");
            None
        }
    };
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.store = Some(store.clone());
    info!(workspace = %path.display(), backend = store.backend_kind().as_str(), "workspace opened");

    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "storeBackend": store.backend_kind().as_str(),
        "session": state.session,
    }))
}

async fn workspace_select(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = get_required_str(&req.params, "path").map_err(|_| HandlerErr::bad_params("missing params.path"))?;
    open_workspace(state, PathBuf::from(path)).await
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => Ok(health(state)),
        "workspace.select" => workspace_select(state, req).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
