use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, tenant, to_value};
use crate::ipc::types::{AppState, Request};
use crate::model::{new_record_id, Class};
use crate::store::StoreError;
use serde_json::json;
use tracing::info;

async fn classes_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let snap = store.load(&session).await?;
    let rows: Vec<serde_json::Value> = snap
        .classes
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "className": c.class_name,
                "sections": c.sections,
                "classTeacherName": c.class_teacher_name,
                "studentCount": snap.students.iter().filter(|s| s.class_id == c.id).count(),
            })
        })
        .collect();
    Ok(json!({ "classes": rows }))
}

fn parse_sections(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    match params.get("sections") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params("sections must be strings"))
            })
            .collect(),
        // "A, B" as typed into a single field.
        Some(serde_json::Value::String(s)) => Ok(s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()),
        _ => Err(HandlerErr::bad_params("missing sections")),
    }
}

async fn classes_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let class = Class {
        id: get_optional_str(&req.params, "id").unwrap_or_else(new_record_id),
        class_name: get_required_str(&req.params, "className")?.trim().to_string(),
        sections: parse_sections(&req.params)?,
        class_teacher_name: get_required_str(&req.params, "classTeacherName")?
            .trim()
            .to_string(),
    };
    let stored = store.upsert_class(&session, class).await?;
    info!(tenant = %session.tenant_id, class = %stored.id, "class saved");
    Ok(json!({ "class": to_value(&stored)? }))
}

async fn classes_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let removed = match store.delete_class(&session, &class_id).await {
        Err(StoreError::UnknownClass(id)) => {
            return Err(HandlerErr::new("not_found", format!("unknown class: {id}")));
        }
        other => other?,
    };
    info!(tenant = %session.tenant_id, class = %removed.id, "class deleted");
    Ok(json!({ "deleted": removed.id }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state).await,
        "classes.upsert" => classes_upsert(state, req).await,
        "classes.delete" => classes_delete(state, req).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
