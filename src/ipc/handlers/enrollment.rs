use crate::attendance::today;
use crate::enrollment::{EnrollmentForm, SubmitOutcome};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_params, tenant, to_value};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn status(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    to_value(&state.enrollment.view())
}

async fn submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let form: EnrollmentForm = parse_params(&req.params)?;
    let date = today();
    let academic_year = state.config.billing.academic_year.clone();
    let outcome = state
        .enrollment
        .submit(
            &form,
            &state.gateway,
            &store,
            &session,
            &date,
            academic_year.as_deref(),
        )
        .await?;
    match outcome {
        SubmitOutcome::Blocked(existing) => Err(HandlerErr::new(
            "duplicate_face",
            format!("this face is already registered to {}", existing.full_name),
        )
        .with_details(json!({
            "studentId": existing.id,
            "fullName": existing.full_name,
            "classId": existing.class_id,
            "section": existing.section,
        }))),
        SubmitOutcome::Committed { student, fee } => Ok(json!({
            "student": to_value(&student)?,
            "fee": fee.as_ref().map(to_value).transpose()?,
        })),
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("enrollment.") {
        return None;
    }
    if let Err(e) = tenant(state) {
        return Some(e.response(&req.id));
    }
    let result = match req.method.as_str() {
        "enrollment.begin" => {
            state.enrollment.begin();
            status(state)
        }
        "enrollment.capture" => get_required_str(&req.params, "imageData")
            .and_then(|raw| state.enrollment.capture(&raw).map_err(HandlerErr::from))
            .and_then(|_| status(state)),
        "enrollment.retake" => state
            .enrollment
            .retake()
            .map_err(HandlerErr::from)
            .and_then(|_| status(state)),
        "enrollment.submit" => submit(state, req).await,
        "enrollment.status" => status(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
