use crate::attendance::capture::Facing;
use crate::attendance::today;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_date_or, get_optional_str, get_required_str, tenant, to_value};
use crate::ipc::types::{AppState, Request};
use crate::matcher::frame::EncodedImage;
use crate::model::{new_record_id, Attendance, AttendanceStatus, MARKED_BY_MANUAL};
use crate::store::MarkOutcome;
use serde_json::json;
use tracing::debug;

fn parse_facing(raw: Option<String>) -> Result<Option<Facing>, HandlerErr> {
    match raw {
        None => Ok(None),
        Some(s) => Facing::parse(&s)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown facing {}", s))),
    }
}

fn parse_status(raw: Option<String>) -> Result<AttendanceStatus, HandlerErr> {
    match raw.as_deref() {
        None | Some("Present") => Ok(AttendanceStatus::Present),
        Some("Absent") => Ok(AttendanceStatus::Absent),
        Some("Late") => Ok(AttendanceStatus::Late),
        Some(other) => Err(HandlerErr::bad_params(format!("unknown status {}", other))),
    }
}

async fn attendance_mark(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let att = Attendance {
        id: new_record_id(),
        student_id: get_required_str(&req.params, "studentId")?,
        date: get_date_or(&req.params, "date", today)?,
        status: parse_status(get_optional_str(&req.params, "status"))?,
        marked_by: MARKED_BY_MANUAL.to_string(),
    };
    let outcome = store.mark_attendance(&session, att).await?;
    Ok(json!({
        "attendance": to_value(outcome.record())?,
        "alreadyMarked": matches!(outcome, MarkOutcome::AlreadyMarked(_)),
    }))
}

async fn attendance_today(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let date = get_date_or(&req.params, "date", today)?;
    let snap = store.load(&session).await?;
    let rows: Vec<serde_json::Value> = snap
        .attendance_on(&date)
        .map(|a| {
            json!({
                "id": a.id,
                "studentId": a.student_id,
                "fullName": snap.student(&a.student_id).map(|s| s.full_name.clone()),
                "status": a.status,
                "markedBy": a.marked_by,
            })
        })
        .collect();
    Ok(json!({ "date": date, "records": rows }))
}

fn capture_announce(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let denied = req.params.get("denied").and_then(|v| v.as_bool()).unwrap_or(false);
    let mut facings = Vec::new();
    if let Some(items) = req.params.get("facings").and_then(|v| v.as_array()) {
        for item in items {
            let raw = item
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params("facings must be strings"))?;
            let facing = Facing::parse(raw).ok_or_else(|| HandlerErr::bad_params(format!("unknown facing {}", raw)))?;
            facings.push(facing);
        }
    }
    state.feed.announce(&facings, denied);
    Ok(json!({ "facings": state.feed.announced(), "denied": denied }))
}

fn capture_frame(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let facing = parse_facing(get_optional_str(&req.params, "facing"))?.unwrap_or(Facing::Front);
    let raw = get_required_str(&req.params, "imageData")?;
    let bytes = EncodedImage::from_stored(&raw)
        .decode()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let listening = state.feed.publish(facing, bytes)?;
    debug!(facing = facing.as_str(), listening, "frame received");
    Ok(json!({ "accepted": true, "listening": listening }))
}

async fn scanner_start(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, session) = tenant(state)?;
    let scanner = state
        .scanner
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let facing = parse_facing(get_optional_str(&req.params, "facing"))?.unwrap_or(scanner.status().facing);
    scanner.start(&session, facing).await?;
    scanner_status(state)
}

async fn scanner_stop(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let _ = tenant(state)?;
    if let Some(scanner) = state.scanner.as_mut() {
        scanner.stop().await;
    }
    scanner_status(state)
}

async fn scanner_switch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, session) = tenant(state)?;
    let scanner = state
        .scanner
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let facing = match parse_facing(get_optional_str(&req.params, "facing"))? {
        Some(f) => f,
        None => scanner.status().facing.toggled(),
    };
    scanner.switch_facing(&session, facing).await?;
    scanner_status(state)
}

fn scanner_status(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let _ = tenant(state)?;
    let scanner = state
        .scanner
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let mut view = to_value(&scanner.status())?;
    view["running"] = json!(scanner.is_running());
    view["matcher"] = to_value(&state.gateway.stats())?;
    view["liveCaptureStreams"] = json!(state.feed.live_streams());
    Ok(view)
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.mark" => attendance_mark(state, req).await,
        "attendance.today" => attendance_today(state, req).await,
        "capture.announce" => tenant(state).and_then(|_| capture_announce(state, req)),
        "capture.frame" => tenant(state).and_then(|_| capture_frame(state, req)),
        "scanner.start" => scanner_start(state, req).await,
        "scanner.stop" => scanner_stop(state).await,
        "scanner.switchCamera" => scanner_switch(state, req).await,
        "scanner.status" => scanner_status(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
