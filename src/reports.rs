//! Read-only projections over a tenant snapshot.

use crate::model::{Amount, AttendanceStatus};
use crate::store::snapshot::Snapshot;
use serde::Serialize;

const TOP_OUTSTANDING: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCount {
    pub class_id: String,
    pub class_name: String,
    pub students: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outstanding {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_students: usize,
    pub present_today: usize,
    pub fees_collected: Amount,
    pub fees_pending: Amount,
    pub defaulters: usize,
    pub class_distribution: Vec<ClassCount>,
    pub top_outstanding: Vec<Outstanding>,
}

pub fn dashboard(snap: &Snapshot, today: &str) -> Dashboard {
    let collected: Amount = snap.payments.iter().map(|p| p.amount_paid).sum();
    let billed: Amount = snap.student_fees.iter().map(|f| f.total_fees).sum();

    let mut owing: Vec<Outstanding> = snap
        .student_fees
        .iter()
        .filter(|f| f.balance() > 0)
        .map(|f| {
            let student = snap.student(&f.student_id);
            Outstanding {
                student_id: f.student_id.clone(),
                student_name: student.map(|s| s.full_name.clone()).unwrap_or_default(),
                class_name: student
                    .and_then(|s| snap.class(&s.class_id))
                    .map(|c| c.class_name.clone())
                    .unwrap_or_default(),
                balance: f.balance(),
            }
        })
        .collect();
    owing.sort_by(|a, b| b.balance.cmp(&a.balance));
    owing.truncate(TOP_OUTSTANDING);

    Dashboard {
        total_students: snap.students.len(),
        present_today: snap
            .attendance_on(today)
            .filter(|a| a.status == AttendanceStatus::Present)
            .count(),
        fees_collected: collected,
        fees_pending: billed - collected,
        // More than half of the bill still open.
        defaulters: snap
            .student_fees
            .iter()
            .filter(|f| f.balance() * 2 > f.total_fees)
            .count(),
        class_distribution: snap
            .classes
            .iter()
            .map(|c| ClassCount {
                class_id: c.id.clone(),
                class_name: c.class_name.clone(),
                students: snap.students.iter().filter(|s| s.class_id == c.id).count(),
            })
            .collect(),
        top_outstanding: owing,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummaryRow {
    pub student_id: String,
    pub student_name: String,
    pub presents: usize,
    pub absents: usize,
    pub total: usize,
}

/// One row per student that has any attendance record, in first-seen order.
/// Late and Absent both count as absent.
pub fn attendance_summary(snap: &Snapshot) -> Vec<AttendanceSummaryRow> {
    let mut rows: Vec<AttendanceSummaryRow> = Vec::new();
    for a in &snap.attendance {
        let idx = match rows.iter().position(|r| r.student_id == a.student_id) {
            Some(i) => i,
            None => {
                rows.push(AttendanceSummaryRow {
                    student_id: a.student_id.clone(),
                    student_name: snap
                        .student(&a.student_id)
                        .map(|s| s.full_name.clone())
                        .unwrap_or_default(),
                    presents: 0,
                    absents: 0,
                    total: 0,
                });
                rows.len() - 1
            }
        };
        let row = &mut rows[idx];
        if a.status == AttendanceStatus::Present {
            row.presents += 1;
        } else {
            row.absents += 1;
        }
        row.total += 1;
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeReportRow {
    pub student_id: String,
    pub student_name: String,
    pub total: Amount,
    pub paid: Amount,
    pub pending: Amount,
}

pub fn fee_report(snap: &Snapshot) -> Vec<FeeReportRow> {
    snap.student_fees
        .iter()
        .map(|f| FeeReportRow {
            student_id: f.student_id.clone(),
            student_name: snap
                .student(&f.student_id)
                .map(|s| s.full_name.clone())
                .unwrap_or_default(),
            total: f.total_fees,
            paid: f.paid_amount,
            pending: f.balance(),
        })
        .collect()
}
