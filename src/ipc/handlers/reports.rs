use crate::attendance::today;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_date_or, tenant, to_value};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use serde_json::json;

async fn dashboard(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let date = get_date_or(&req.params, "date", today)?;
    let snap = store.load(&session).await?;
    let mut out = to_value(&reports::dashboard(&snap, &date))?;
    out["date"] = json!(date);
    out["schoolName"] = json!(session.school_name);
    Ok(out)
}

async fn attendance_summary(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let snap = store.load(&session).await?;
    Ok(json!({ "rows": to_value(&reports::attendance_summary(&snap))? }))
}

async fn fee_report(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let snap = store.load(&session).await?;
    Ok(json!({ "rows": to_value(&reports::fee_report(&snap))? }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.dashboard" => dashboard(state, req).await,
        "reports.attendanceSummary" => attendance_summary(state).await,
        "reports.fees" => fee_report(state).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
