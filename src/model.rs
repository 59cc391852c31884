//! Entity records persisted in a tenant partition or the tenant directory.

use serde::{Deserialize, Serialize};

/// Whole currency units.
pub type Amount = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            "Other" => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMode {
    Cash,
    Card,
    Online,
    Cheque,
}

impl PaymentMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Cash" => Some(PaymentMode::Cash),
            "Card" => Some(PaymentMode::Card),
            "Online" => Some(PaymentMode::Online),
            "Cheque" => Some(PaymentMode::Cheque),
            _ => None,
        }
    }
}

pub const MARKED_BY_RECOGNITION: &str = "AI Facial Recognition";
pub const MARKED_BY_MANUAL: &str = "Manual";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub school_name: String,
    pub handle: String,
    pub secret_digest: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub class_name: String,
    pub sections: Vec<String>,
    pub class_teacher_name: String,
}

impl Class {
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|s| s == section)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub gender: Gender,
    pub date_of_birth: String,
    pub class_id: String,
    pub section: String,
    pub father_name: String,
    pub mother_name: String,
    pub face_reference: String,
    pub registration_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: String,
    pub student_id: String,
    pub date: String,
    pub status: AttendanceStatus,
    pub marked_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
    pub id: String,
    pub class_id: String,
    pub academic_year: String,
    pub total_fees: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFee {
    pub id: String,
    pub student_id: String,
    pub academic_year: String,
    pub total_fees: Amount,
    pub paid_amount: Amount,
    pub due_date: String,
}

impl StudentFee {
    pub fn balance(&self) -> Amount {
        self.total_fees - self.paid_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistory {
    pub id: String,
    pub student_id: String,
    pub amount_paid: Amount,
    pub payment_date: String,
    pub payment_mode: PaymentMode,
    pub receipt_number: String,
}

/// Short random identifier for records that are never shown to operators.
pub fn new_record_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..9].to_string()
}

/// Operator-facing student identifier, `STU-` plus six uppercase characters.
pub fn new_student_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("STU-{}", raw[..6].to_ascii_uppercase())
}
