use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::HandlerErr;
use super::types::AppState;
use crate::model::Amount;
use crate::session::TenantSession;
use crate::store::RecordStore;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Calendar date as `YYYY-MM-DD`, normalized; absent falls back to `default`.
pub fn get_date_or(
    params: &serde_json::Value,
    key: &str,
    default: impl FnOnce() -> String,
) -> Result<String, HandlerErr> {
    let Some(raw) = get_optional_str(params, key) else {
        return Ok(default());
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date, got {}", key, raw)))
}

/// Whole currency units; fractional values are refused.
pub fn get_required_amount(params: &serde_json::Value, key: &str) -> Result<Amount, HandlerErr> {
    let v = params
        .get(key)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if let Some(n) = v.as_i64() {
        return Ok(n);
    }
    match v.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(f as Amount),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a whole amount", key))),
        None => Err(HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    let source = if params.is_null() {
        serde_json::json!({})
    } else {
        params.clone()
    };
    serde_json::from_value(source).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

pub fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn workspace_store(state: &AppState) -> Result<Arc<RecordStore>, HandlerErr> {
    state
        .store
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Store plus the signed-in tenant; every tenant-scoped method goes through here.
pub fn tenant(state: &AppState) -> Result<(Arc<RecordStore>, TenantSession), HandlerErr> {
    let store = workspace_store(state)?;
    let session = state
        .session
        .clone()
        .ok_or_else(|| HandlerErr::new("no_session", "sign in first"))?;
    Ok((store, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dates_must_be_calendar_days() {
        let fallback = || "2024-01-01".to_string();
        assert_eq!(get_date_or(&json!({}), "date", fallback).expect("default"), "2024-01-01");
        assert_eq!(
            get_date_or(&json!({ "date": " 2024-02-29 " }), "date", fallback).expect("leap day"),
            "2024-02-29"
        );
        for bad in ["2023-02-29", "01/02/2024", "today", "2024-00-10"] {
            let err = get_date_or(&json!({ "date": bad }), "date", fallback).expect_err(bad);
            assert_eq!(err.code, "bad_params");
        }
    }

    #[test]
    fn amounts_are_whole_numbers() {
        assert_eq!(get_required_amount(&json!({ "a": 1500 }), "a").expect("int"), 1500);
        assert_eq!(get_required_amount(&json!({ "a": 20.0 }), "a").expect("whole float"), 20);
        assert_eq!(get_required_amount(&json!({ "a": 2.5 }), "a").expect_err("fraction").code, "bad_params");
    }
}
