use crate::attendance::capture::CaptureError;
use crate::attendance::ScanError;
use crate::billing::BillingError;
use crate::enrollment::EnrollmentError;
use crate::session::SessionError;
use crate::store::StoreError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(value) => ok(id, value),
        Err(e) => e.response(id),
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::Unavailable(_) | StoreError::Backend(_) => {
                HandlerErr::new("store_unavailable", message).with_details(json!({ "retryable": true }))
            }
            StoreError::Conflict(_) => {
                HandlerErr::new("store_conflict", message).with_details(json!({ "retryable": true }))
            }
            StoreError::Corrupt { partition, .. } => {
                HandlerErr::new("store_corrupt", message).with_details(json!({ "partition": partition }))
            }
            StoreError::UnknownStudent(id) => {
                HandlerErr::new("not_found", message).with_details(json!({ "studentId": id }))
            }
            StoreError::UnknownClass(id) => {
                HandlerErr::new("validation_failed", message).with_details(json!({ "classId": id }))
            }
            StoreError::UnknownSection { class_id, section } => HandlerErr::new("validation_failed", message)
                .with_details(json!({ "classId": class_id, "section": section })),
            StoreError::NoFeeRecord(id) => {
                HandlerErr::new("no_fee_record", message).with_details(json!({ "studentId": id }))
            }
            StoreError::HandleTaken(handle) => {
                HandlerErr::new("collision", message).with_details(json!({ "handle": handle }))
            }
            StoreError::ClassInUse {
                class_id,
                students,
                fee_structures,
            } => HandlerErr::new("class_in_use", message).with_details(json!({
                "classId": class_id,
                "students": students,
                "feeStructures": fee_structures,
            })),
            StoreError::Invalid(_) => HandlerErr::new("validation_failed", message),
        }
    }
}

impl From<SessionError> for HandlerErr {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Validation(m) => HandlerErr::new("validation_failed", m),
            SessionError::InvalidCredentials => HandlerErr::new("invalid_credentials", e.to_string()),
            SessionError::HandleTaken(ref handle) => {
                HandlerErr::new("collision", e.to_string()).with_details(json!({ "handle": handle }))
            }
            SessionError::Store(inner) => inner.into(),
            SessionError::Marker(m) => HandlerErr::new("store_unavailable", m),
        }
    }
}

impl From<EnrollmentError> for HandlerErr {
    fn from(e: EnrollmentError) -> Self {
        match e {
            EnrollmentError::Store(inner) => inner.into(),
            EnrollmentError::WrongState { .. } => HandlerErr::new("invalid_state", e.to_string()),
            EnrollmentError::Validation(_) | EnrollmentError::NoCapture | EnrollmentError::Image(_) => {
                HandlerErr::new("validation_failed", e.to_string())
            }
        }
    }
}

impl From<BillingError> for HandlerErr {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::InvalidAmount => HandlerErr::new("validation_failed", e.to_string()),
            BillingError::ExceedsBalance { amount, balance } => HandlerErr::new("exceeds_balance", e.to_string())
                .with_details(json!({ "amount": amount, "balance": balance })),
            BillingError::ReceiptNumbersExhausted => HandlerErr::new("store_conflict", e.to_string())
                .with_details(json!({ "retryable": true })),
            BillingError::Store(inner) => inner.into(),
        }
    }
}

impl From<CaptureError> for HandlerErr {
    fn from(e: CaptureError) -> Self {
        let reason = match e {
            CaptureError::NoDevice(_) => "no_device",
            CaptureError::PermissionDenied => "permission_denied",
            CaptureError::Closed => "closed",
        };
        HandlerErr::new("capture_unavailable", e.to_string()).with_details(json!({ "reason": reason }))
    }
}

impl From<ScanError> for HandlerErr {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Busy => HandlerErr::new("scanner_busy", e.to_string()),
            ScanError::Capture(inner) => inner.into(),
        }
    }
}
