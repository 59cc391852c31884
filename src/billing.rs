//! Fee collection and ledger views.

use crate::model::{Amount, PaymentHistory, PaymentMode};
use crate::session::TenantSession;
use crate::store::ops::apply_add_payment;
use crate::store::snapshot::Snapshot;
use crate::store::{RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Fee template year for new students; `None` picks each class's latest.
    pub academic_year: Option<String>,
    pub receipt_prefix: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        BillingConfig {
            academic_year: None,
            receipt_prefix: "REC-".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("amount {amount} exceeds outstanding balance {balance}")]
    ExceedsBalance { amount: Amount, balance: Amount },

    #[error("no free receipt number near the current one")]
    ReceiptNumbersExhausted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub student_id: String,
    pub amount: Amount,
    pub mode: PaymentMode,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_number: String,
    pub student_id: String,
    pub student_name: String,
    pub amount_paid: Amount,
    pub payment_mode: PaymentMode,
    pub payment_date: String,
    pub total_fees: Amount,
    pub paid_amount: Amount,
    pub balance: Amount,
}

const RECEIPT_SCAN_LIMIT: i64 = 1000;

fn next_receipt(snap: &Snapshot, prefix: &str, epoch_millis: i64) -> Result<String, BillingError> {
    let taken: HashSet<&str> = snap.payments.iter().map(|p| p.receipt_number.as_str()).collect();
    let start = epoch_millis.rem_euclid(1_000_000);
    (0..RECEIPT_SCAN_LIMIT)
        .map(|step| format!("{prefix}{:06}", (start + step) % 1_000_000))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .ok_or(BillingError::ReceiptNumbersExhausted)
}

/// Records a payment against the student's ledger in one store update.
pub async fn collect_payment(
    store: &RecordStore,
    session: &TenantSession,
    config: &BillingConfig,
    req: PaymentRequest,
) -> Result<Receipt, BillingError> {
    if req.amount <= 0 {
        return Err(BillingError::InvalidAmount);
    }
    let millis = chrono::Utc::now().timestamp_millis();

    let receipt = store
        .update(session, |snap: &mut Snapshot| -> Result<Receipt, BillingError> {
            let fee = snap
                .fee_for_student(&req.student_id)
                .ok_or_else(|| StoreError::NoFeeRecord(req.student_id.clone()))?;
            let balance = fee.balance();
            if req.amount > balance {
                return Err(BillingError::ExceedsBalance {
                    amount: req.amount,
                    balance,
                });
            }
            let student_name = snap
                .student(&req.student_id)
                .map(|s| s.full_name.clone())
                .unwrap_or_default();
            let payment = PaymentHistory {
                id: crate::model::new_record_id(),
                student_id: req.student_id.clone(),
                amount_paid: req.amount,
                payment_date: req.date.clone(),
                payment_mode: req.mode,
                receipt_number: next_receipt(snap, &config.receipt_prefix, millis)?,
            };
            let receipt_number = payment.receipt_number.clone();
            let updated = apply_add_payment(snap, payment)?;
            Ok(Receipt {
                receipt_number,
                student_id: req.student_id.clone(),
                student_name,
                amount_paid: req.amount,
                payment_mode: req.mode,
                payment_date: req.date.clone(),
                total_fees: updated.total_fees,
                paid_amount: updated.paid_amount,
                balance: updated.balance(),
            })
        })
        .await?;

    info!(
        tenant = %session.tenant_id,
        student = %receipt.student_id,
        receipt = %receipt.receipt_number,
        amount = receipt.amount_paid,
        "payment collected"
    );
    Ok(receipt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeeStatus {
    Paid,
    Partial,
    Unpaid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRow {
    pub fee_id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub class_name: String,
    pub section: String,
    pub academic_year: String,
    pub total_fees: Amount,
    pub paid_amount: Amount,
    pub balance: Amount,
    pub due_date: String,
    pub status: FeeStatus,
    pub payments: Vec<PaymentHistory>,
}

pub fn fee_status(total: Amount, paid: Amount) -> FeeStatus {
    if total - paid <= 0 {
        FeeStatus::Paid
    } else if paid > 0 {
        FeeStatus::Partial
    } else {
        FeeStatus::Unpaid
    }
}

pub fn ledger(snap: &Snapshot) -> Vec<LedgerRow> {
    snap.student_fees
        .iter()
        .map(|fee| {
            let student = snap.student(&fee.student_id);
            let class_id = student.map(|s| s.class_id.clone()).unwrap_or_default();
            LedgerRow {
                fee_id: fee.id.clone(),
                student_id: fee.student_id.clone(),
                student_name: student.map(|s| s.full_name.clone()).unwrap_or_default(),
                class_name: snap
                    .class(&class_id)
                    .map(|c| c.class_name.clone())
                    .unwrap_or_default(),
                class_id,
                section: student.map(|s| s.section.clone()).unwrap_or_default(),
                academic_year: fee.academic_year.clone(),
                total_fees: fee.total_fees,
                paid_amount: fee.paid_amount,
                balance: fee.balance(),
                due_date: fee.due_date.clone(),
                status: fee_status(fee.total_fees, fee.paid_amount),
                payments: history(snap, &fee.student_id),
            }
        })
        .collect()
}

/// Payments for one student, newest first.
pub fn history(snap: &Snapshot, student_id: &str) -> Vec<PaymentHistory> {
    let mut rows: Vec<PaymentHistory> = snap
        .payments
        .iter()
        .filter(|p| p.student_id == student_id)
        .rev()
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
    rows
}
