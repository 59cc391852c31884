use crate::billing;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, tenant, to_value};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

async fn students_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let class_id = get_optional_str(&req.params, "classId");
    let section = get_optional_str(&req.params, "section");
    let snap = store.load(&session).await?;
    let rows: Vec<serde_json::Value> = snap
        .students
        .iter()
        .filter(|s| class_id.as_deref().map(|c| s.class_id == c).unwrap_or(true))
        .filter(|s| section.as_deref().map(|x| s.section == x).unwrap_or(true))
        .map(|s| {
            json!({
                "id": s.id,
                "fullName": s.full_name,
                "gender": s.gender,
                "classId": s.class_id,
                "className": snap.class(&s.class_id).map(|c| c.class_name.clone()),
                "section": s.section,
                "registrationDate": s.registration_date,
                "faceReference": s.face_reference,
            })
        })
        .collect();
    Ok(json!({ "students": rows }))
}

async fn students_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let snap = store.load(&session).await?;
    let Some(student) = snap.student(&student_id) else {
        return Err(HandlerErr::new("not_found", format!("unknown student: {}", student_id)));
    };
    let attendance: Vec<_> = snap
        .attendance
        .iter()
        .filter(|a| a.student_id == student_id)
        .collect();
    Ok(json!({
        "student": to_value(student)?,
        "class": snap.class(&student.class_id).map(to_value).transpose()?,
        "fee": snap.fee_for_student(&student_id).map(to_value).transpose()?,
        "payments": to_value(&billing::history(&snap, &student_id))?,
        "attendance": to_value(&attendance)?,
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req).await,
        "students.get" => students_get(state, req).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
