use crate::model::{
    Attendance, Class, FeeStructure, PaymentHistory, School, Student, StudentFee,
};
use serde::{Deserialize, Serialize};

/// Entity collections of one tenant partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub students: Vec<Student>,
    pub classes: Vec<Class>,
    pub attendance: Vec<Attendance>,
    pub fee_structures: Vec<FeeStructure>,
    pub student_fees: Vec<StudentFee>,
    pub payments: Vec<PaymentHistory>,
}

// Stored blobs may predate a collection or carry an explicit null for it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    students: Option<Vec<Student>>,
    classes: Option<Vec<Class>>,
    attendance: Option<Vec<Attendance>>,
    fee_structures: Option<Vec<FeeStructure>>,
    student_fees: Option<Vec<StudentFee>>,
    payments: Option<Vec<PaymentHistory>>,
}

impl Snapshot {
    /// State of a partition that has never been written.
    pub fn seeded() -> Self {
        Snapshot {
            students: Vec::new(),
            classes: seed_classes(),
            attendance: Vec::new(),
            fee_structures: seed_fee_structures(),
            student_fees: Vec::new(),
            payments: Vec::new(),
        }
    }

    pub fn from_json(body: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawSnapshot = if body.is_null() {
            RawSnapshot::default()
        } else {
            serde_json::from_value(body.clone())?
        };
        Ok(Snapshot {
            students: raw.students.unwrap_or_default(),
            classes: raw.classes.unwrap_or_else(seed_classes),
            attendance: raw.attendance.unwrap_or_default(),
            fee_structures: raw.fee_structures.unwrap_or_else(seed_fee_structures),
            student_fees: raw.student_fees.unwrap_or_default(),
            payments: raw.payments.unwrap_or_default(),
        })
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn class(&self, id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == id)
    }

    pub fn fee_for_student(&self, student_id: &str) -> Option<&StudentFee> {
        self.student_fees.iter().find(|f| f.student_id == student_id)
    }

    pub fn attendance_on(&self, date: &str) -> impl Iterator<Item = &Attendance> + '_ {
        let date = date.to_string();
        self.attendance.iter().filter(move |a| a.date == date)
    }
}

/// Tenant accounts, kept in their own partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub schools: Vec<School>,
}

impl Directory {
    pub fn from_json(body: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if body.is_null() {
            return Ok(Directory::default());
        }
        serde_json::from_value(body.clone())
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn by_handle(&self, handle: &str) -> Option<&School> {
        self.schools.iter().find(|s| s.handle == handle)
    }

    pub fn by_id(&self, id: &str) -> Option<&School> {
        self.schools.iter().find(|s| s.id == id)
    }
}

fn null_as_empty<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(de)?.unwrap_or_default())
}

pub fn seed_classes() -> Vec<Class> {
    vec![
        Class {
            id: "1".to_string(),
            class_name: "Class 1".to_string(),
            sections: vec!["A".to_string(), "B".to_string()],
            class_teacher_name: "Mrs. Sharma".to_string(),
        },
        Class {
            id: "2".to_string(),
            class_name: "Class 2".to_string(),
            sections: vec!["A".to_string()],
            class_teacher_name: "Mr. Khan".to_string(),
        },
    ]
}

pub fn seed_fee_structures() -> Vec<FeeStructure> {
    vec![
        FeeStructure {
            id: "1".to_string(),
            class_id: "1".to_string(),
            academic_year: "2024-25".to_string(),
            total_fees: 50000,
        },
        FeeStructure {
            id: "2".to_string(),
            class_id: "2".to_string(),
            academic_year: "2024-25".to_string(),
            total_fees: 55000,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_classes_fall_back_to_seed() {
        let snap = Snapshot::from_json(&json!({ "students": [], "attendance": [] }))
            .expect("parse");
        assert_eq!(snap.classes, seed_classes());
        assert_eq!(snap.fee_structures, seed_fee_structures());
        assert!(snap.payments.is_empty());
    }

    #[test]
    fn null_collections_are_never_null() {
        let snap = Snapshot::from_json(&json!({
            "classes": null,
            "payments": null,
            "studentFees": null
        }))
        .expect("parse");
        assert_eq!(snap.classes.len(), 2);
        assert!(snap.payments.is_empty());
        assert!(snap.student_fees.is_empty());
    }

    #[test]
    fn explicit_empty_classes_are_kept() {
        let snap = Snapshot::from_json(&json!({ "classes": [] })).expect("parse");
        assert!(snap.classes.is_empty());
    }

    #[test]
    fn directory_tolerates_null_schools() {
        let dir = Directory::from_json(&json!({ "schools": null })).expect("parse");
        assert!(dir.schools.is_empty());
        let dir = Directory::from_json(&serde_json::Value::Null).expect("parse");
        assert!(dir.schools.is_empty());
    }
}
