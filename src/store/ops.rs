//! Entity operations: pure snapshot mutations plus their store wrappers.

use super::snapshot::{Directory, Snapshot};
use super::{RecordStore, StoreError};
use crate::model::{Attendance, Class, FeeStructure, PaymentHistory, School, Student, StudentFee};
use crate::session::TenantSession;
use chrono::Datelike;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Marked(Attendance),
    AlreadyMarked(Attendance),
}

impl MarkOutcome {
    pub fn record(&self) -> &Attendance {
        match self {
            MarkOutcome::Marked(a) | MarkOutcome::AlreadyMarked(a) => a,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, MarkOutcome::Marked(_))
    }
}

/// The template a new student's ledger is derived from.
pub fn fee_structure_for<'a>(
    snap: &'a Snapshot,
    class_id: &str,
    academic_year: Option<&str>,
) -> Option<&'a FeeStructure> {
    let mut candidates = snap.fee_structures.iter().filter(|fs| fs.class_id == class_id);
    match academic_year {
        Some(year) => candidates.find(|fs| fs.academic_year == year),
        None => candidates.max_by(|a, b| a.academic_year.cmp(&b.academic_year)),
    }
}

/// Dec 31 of the academic year's first calendar year ("2024-25" -> 2024-12-31).
pub fn due_date_for(academic_year: &str) -> String {
    let start = academic_year
        .get(..4)
        .and_then(|y| y.parse::<i32>().ok())
        .unwrap_or_else(|| chrono::Utc::now().year());
    format!("{start:04}-12-31")
}

pub fn apply_add_student(
    snap: &mut Snapshot,
    student: Student,
    academic_year: Option<&str>,
) -> Result<Option<StudentFee>, StoreError> {
    let class = snap
        .class(&student.class_id)
        .ok_or_else(|| StoreError::UnknownClass(student.class_id.clone()))?;
    if !class.has_section(&student.section) {
        return Err(StoreError::UnknownSection {
            class_id: student.class_id.clone(),
            section: student.section.clone(),
        });
    }
    if snap.student(&student.id).is_some() {
        return Err(StoreError::Invalid(format!("student id {} already exists", student.id)));
    }

    let fee = fee_structure_for(snap, &student.class_id, academic_year).map(|fs| StudentFee {
        id: crate::model::new_record_id(),
        student_id: student.id.clone(),
        academic_year: fs.academic_year.clone(),
        total_fees: fs.total_fees,
        paid_amount: 0,
        due_date: due_date_for(&fs.academic_year),
    });

    snap.students.push(student);
    if let Some(f) = &fee {
        snap.student_fees.push(f.clone());
    }
    Ok(fee)
}

pub fn apply_mark_attendance(snap: &mut Snapshot, att: Attendance) -> Result<MarkOutcome, StoreError> {
    if snap.student(&att.student_id).is_none() {
        return Err(StoreError::UnknownStudent(att.student_id));
    }
    if let Some(existing) = snap
        .attendance
        .iter()
        .find(|a| a.student_id == att.student_id && a.date == att.date)
    {
        return Ok(MarkOutcome::AlreadyMarked(existing.clone()));
    }
    snap.attendance.push(att.clone());
    Ok(MarkOutcome::Marked(att))
}

/// Appends the payment and raises the matching ledger's paid amount.
pub fn apply_add_payment(snap: &mut Snapshot, payment: PaymentHistory) -> Result<StudentFee, StoreError> {
    let Some(fee) = snap
        .student_fees
        .iter_mut()
        .find(|f| f.student_id == payment.student_id)
    else {
        return Err(StoreError::NoFeeRecord(payment.student_id));
    };
    fee.paid_amount += payment.amount_paid;
    let updated = fee.clone();
    snap.payments.push(payment);
    Ok(updated)
}

pub fn apply_upsert_class(snap: &mut Snapshot, class: Class) -> Result<Class, StoreError> {
    if class.class_name.trim().is_empty() {
        return Err(StoreError::Invalid("className must not be empty".into()));
    }
    if class.class_teacher_name.trim().is_empty() {
        return Err(StoreError::Invalid("classTeacherName must not be empty".into()));
    }
    if class.sections.is_empty() || class.sections.iter().any(|s| s.trim().is_empty()) {
        return Err(StoreError::Invalid("sections must be non-empty labels".into()));
    }
    for (i, s) in class.sections.iter().enumerate() {
        if class.sections[..i].contains(s) {
            return Err(StoreError::Invalid(format!("duplicate section {}", s)));
        }
    }

    match snap.classes.iter().position(|c| c.id == class.id) {
        Some(pos) => {
            // Sections still holding students cannot be dropped.
            let enrolled = snap
                .students
                .iter()
                .filter(|s| s.class_id == class.id && !class.sections.contains(&s.section))
                .count();
            if enrolled > 0 {
                return Err(StoreError::ClassInUse {
                    class_id: class.id,
                    students: enrolled,
                    fee_structures: 0,
                });
            }
            snap.classes[pos] = class.clone();
        }
        None => snap.classes.push(class.clone()),
    }
    Ok(class)
}

pub fn apply_delete_class(snap: &mut Snapshot, class_id: &str) -> Result<Class, StoreError> {
    let Some(pos) = snap.classes.iter().position(|c| c.id == class_id) else {
        return Err(StoreError::UnknownClass(class_id.to_string()));
    };
    let students = snap.students.iter().filter(|s| s.class_id == class_id).count();
    let fee_structures = snap
        .fee_structures
        .iter()
        .filter(|fs| fs.class_id == class_id)
        .count();
    if students > 0 || fee_structures > 0 {
        return Err(StoreError::ClassInUse {
            class_id: class_id.to_string(),
            students,
            fee_structures,
        });
    }
    Ok(snap.classes.remove(pos))
}

pub fn apply_upsert_fee_structure(
    snap: &mut Snapshot,
    structure: FeeStructure,
) -> Result<FeeStructure, StoreError> {
    if snap.class(&structure.class_id).is_none() {
        return Err(StoreError::UnknownClass(structure.class_id));
    }
    if structure.total_fees <= 0 {
        return Err(StoreError::Invalid("totalFees must be positive".into()));
    }
    if structure.academic_year.trim().is_empty() {
        return Err(StoreError::Invalid("academicYear must not be empty".into()));
    }
    // One template per class and academic year.
    let by_id = snap.fee_structures.iter().position(|fs| fs.id == structure.id);
    let owner = snap
        .fee_structures
        .iter()
        .position(|fs| fs.class_id == structure.class_id && fs.academic_year == structure.academic_year);
    let slot = match (by_id, owner) {
        (Some(i), Some(j)) if i != j => {
            return Err(StoreError::Invalid(format!(
                "fee structure {} already covers class {} for {}",
                snap.fee_structures[j].id, structure.class_id, structure.academic_year
            )));
        }
        (Some(i), _) | (None, Some(i)) => Some(i),
        (None, None) => None,
    };
    let stored = match slot {
        Some(i) => {
            let id = snap.fee_structures[i].id.clone();
            snap.fee_structures[i] = FeeStructure { id, ..structure };
            snap.fee_structures[i].clone()
        }
        None => {
            snap.fee_structures.push(structure.clone());
            structure
        }
    };
    Ok(stored)
}

pub fn apply_register_tenant(dir: &mut Directory, school: School) -> Result<School, StoreError> {
    if dir.by_handle(&school.handle).is_some() {
        return Err(StoreError::HandleTaken(school.handle));
    }
    dir.schools.push(school.clone());
    Ok(school)
}

impl RecordStore {
    pub async fn add_student(
        &self,
        session: &TenantSession,
        student: Student,
        academic_year: Option<&str>,
    ) -> Result<Option<StudentFee>, StoreError> {
        let student_id = student.id.clone();
        let fee = self
            .update(session, |snap: &mut Snapshot| {
                apply_add_student(snap, student.clone(), academic_year)
            })
            .await?;
        info!(tenant = %session.tenant_id, student = %student_id, with_fee = fee.is_some(), "student added");
        Ok(fee)
    }

    pub async fn mark_attendance(
        &self,
        session: &TenantSession,
        att: Attendance,
    ) -> Result<MarkOutcome, StoreError> {
        self.update(session, |snap: &mut Snapshot| apply_mark_attendance(snap, att.clone()))
            .await
    }

    pub async fn add_payment(
        &self,
        session: &TenantSession,
        payment: PaymentHistory,
    ) -> Result<StudentFee, StoreError> {
        self.update(session, |snap: &mut Snapshot| apply_add_payment(snap, payment.clone()))
            .await
    }

    pub async fn register_tenant(&self, school: School) -> Result<School, StoreError> {
        self.update_directory(|dir: &mut Directory| apply_register_tenant(dir, school.clone()))
            .await
    }

    pub async fn upsert_class(&self, session: &TenantSession, class: Class) -> Result<Class, StoreError> {
        self.update(session, |snap: &mut Snapshot| apply_upsert_class(snap, class.clone()))
            .await
    }

    pub async fn delete_class(&self, session: &TenantSession, class_id: &str) -> Result<Class, StoreError> {
        self.update(session, |snap: &mut Snapshot| apply_delete_class(snap, class_id))
            .await
    }

    pub async fn upsert_fee_structure(
        &self,
        session: &TenantSession,
        structure: FeeStructure,
    ) -> Result<FeeStructure, StoreError> {
        self.update(session, |snap: &mut Snapshot| {
            apply_upsert_fee_structure(snap, structure.clone())
        })
        .await
    }
}
