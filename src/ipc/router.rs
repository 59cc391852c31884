use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub async fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::fees::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::enrollment::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::assistant::try_handle(state, &req).await {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
