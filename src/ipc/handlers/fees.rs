use crate::attendance::today;
use crate::billing::{self, PaymentRequest};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_date_or, get_optional_str, get_required_amount, get_required_str, tenant, to_value};
use crate::ipc::types::{AppState, Request};
use crate::model::{new_record_id, FeeStructure, PaymentMode};
use serde_json::json;

async fn fee_structures_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let snap = store.load(&session).await?;
    let rows: Vec<serde_json::Value> = snap
        .fee_structures
        .iter()
        .map(|fs| {
            json!({
                "id": fs.id,
                "classId": fs.class_id,
                "className": snap.class(&fs.class_id).map(|c| c.class_name.clone()),
                "academicYear": fs.academic_year,
                "totalFees": fs.total_fees,
            })
        })
        .collect();
    Ok(json!({ "feeStructures": rows }))
}

async fn fee_structures_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let structure = FeeStructure {
        id: get_optional_str(&req.params, "id").unwrap_or_else(new_record_id),
        class_id: get_required_str(&req.params, "classId")?,
        academic_year: get_required_str(&req.params, "academicYear")?.trim().to_string(),
        total_fees: get_required_amount(&req.params, "totalFees")?,
    };
    let stored = store.upsert_fee_structure(&session, structure).await?;
    Ok(json!({ "feeStructure": to_value(&stored)? }))
}

async fn fees_ledger(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let snap = store.load(&session).await?;
    Ok(json!({ "rows": to_value(&billing::ledger(&snap))? }))
}

async fn fees_collect(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let mode_raw = get_optional_str(&req.params, "paymentMode").unwrap_or_else(|| "Cash".to_string());
    let mode = PaymentMode::parse(&mode_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown paymentMode {}", mode_raw)))?;
    let request = PaymentRequest {
        student_id: get_required_str(&req.params, "studentId")?,
        amount: get_required_amount(&req.params, "amount")?,
        mode,
        date: get_date_or(&req.params, "paymentDate", today)?,
    };
    let receipt = billing::collect_payment(&store, &session, &state.config.billing, request).await?;
    Ok(json!({ "receipt": to_value(&receipt)? }))
}

async fn fees_history(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (store, session) = tenant(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let snap = store.load(&session).await?;
    Ok(json!({
        "studentId": student_id,
        "payments": to_value(&billing::history(&snap, &student_id))?,
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "feeStructures.list" => fee_structures_list(state).await,
        "feeStructures.upsert" => fee_structures_upsert(state, req).await,
        "fees.ledger" => fees_ledger(state).await,
        "fees.collect" => fees_collect(state, req).await,
        "fees.history" => fees_history(state, req).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
