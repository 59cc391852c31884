use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, tenant, workspace_store};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, Registration, TenantSession};
use serde_json::json;
use tracing::{info, warn};

fn remember(state: &AppState, current: Option<&TenantSession>) {
    let Some(conn) = state.db.as_ref() else {
        return;
    };
    let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
    // The marker only saves a sign-in across restarts; losing it is not fatal.
    if let Err(e) = session::persist_marker(&guard, current) {
        warn!(error = %e, "could not persist session marker");
    }
}

async fn sign_in(state: &mut AppState, signed_in: TenantSession) -> serde_json::Value {
    state.end_tenant_work().await;
    remember(state, Some(&signed_in));
    let result = json!({ "session": signed_in });
    state.session = Some(signed_in);
    result
}

async fn register(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = workspace_store(state)?;
    let p = &req.params;
    let reg = Registration {
        school_name: get_required_str(p, "schoolName")?,
        handle: get_required_str(p, "handle")?,
        secret: get_required_str(p, "secret")?,
        address: get_optional_str(p, "address"),
        contact_email: get_optional_str(p, "contactEmail"),
        contact_phone: get_optional_str(p, "contactPhone"),
    };
    let created = session::register(&store, reg).await?;
    Ok(sign_in(state, created).await)
}

async fn login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = workspace_store(state)?;
    let handle = get_required_str(&req.params, "handle")?;
    let secret = get_required_str(&req.params, "secret")?;
    let signed_in = session::login(&store, &handle, &secret).await?;
    Ok(sign_in(state, signed_in).await)
}

async fn logout(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let (_, current) = tenant(state)?;
    state.end_tenant_work().await;
    remember(state, None);
    state.session = None;
    info!(tenant = %current.tenant_id, "tenant signed out");
    Ok(json!({ "signedOut": true }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.register" => register(state, req).await,
        "session.login" => login(state, req).await,
        "session.logout" => logout(state).await,
        "session.current" => Ok(json!({ "session": state.session })),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
