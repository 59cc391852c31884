use crate::assistant;
use crate::attendance::today;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, tenant, to_value};
use crate::ipc::types::{AppState, Request};

async fn ask(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let question = get_optional_str(&req.params, "question")
        .ok_or_else(|| HandlerErr::bad_params("missing question"))?;
    let snap = store.load(&session).await?;
    let answer = assistant::ask(
        state.provider.as_ref(),
        &session.school_name,
        &snap,
        &today(),
        &question,
    )
    .await;
    to_value(&answer)
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assistant.ask" => Some(respond(&req.id, ask(state, req).await)),
        _ => None,
    }
}
