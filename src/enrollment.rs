//! Student enrollment with a duplicate-face check.
//!
//! A draft moves `Idle -> Capturing -> Captured -> Checking` and ends either
//! `Blocked` (the face already belongs to an enrolled student, nothing is
//! written) or `Committed` (a new student and its fee ledger are stored).

use crate::matcher::frame::{EncodedImage, ImageError};
use crate::matcher::{MatchResult, MatcherGateway};
use crate::model::{new_student_id, Gender, Student, StudentFee};
use crate::session::TenantSession;
use crate::store::{RecordStore, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EnrollmentState {
    Idle,
    Capturing,
    Captured,
    Checking,
    Blocked,
    Committed,
}

impl EnrollmentState {
    fn as_str(&self) -> &'static str {
        match self {
            EnrollmentState::Idle => "idle",
            EnrollmentState::Capturing => "capturing",
            EnrollmentState::Captured => "captured",
            EnrollmentState::Checking => "checking",
            EnrollmentState::Blocked => "blocked",
            EnrollmentState::Committed => "committed",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrollmentForm {
    pub full_name: String,
    pub gender: String,
    pub date_of_birth: String,
    pub class_id: String,
    pub section: String,
    pub father_name: String,
    pub mother_name: String,
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("{0}")]
    Validation(String),

    #[error("capture a photo before submitting")]
    NoCapture,

    #[error("captured image rejected: {0}")]
    Image(#[from] ImageError),

    #[error("cannot {action} while {}", .state.as_str())]
    WrongState {
        action: &'static str,
        state: EnrollmentState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Blocked(Student),
    Committed {
        student: Student,
        fee: Option<StudentFee>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    pub state: EnrollmentState,
    pub has_capture: bool,
    pub blocked_by: Option<Student>,
    pub committed: Option<Student>,
}

#[derive(Debug)]
pub struct Enrollment {
    state: EnrollmentState,
    capture: Option<EncodedImage>,
    blocked_by: Option<Student>,
    committed: Option<Student>,
}

impl Default for Enrollment {
    fn default() -> Self {
        Enrollment {
            state: EnrollmentState::Idle,
            capture: None,
            blocked_by: None,
            committed: None,
        }
    }
}

struct ValidForm {
    full_name: String,
    gender: Gender,
    date_of_birth: String,
    class_id: String,
    section: String,
    father_name: String,
    mother_name: String,
}

fn required(value: &str, field: &str) -> Result<String, EnrollmentError> {
    let t = value.trim();
    if t.is_empty() {
        return Err(EnrollmentError::Validation(format!("{} is required", field)));
    }
    Ok(t.to_string())
}

fn validate(form: &EnrollmentForm, today: &str) -> Result<ValidForm, EnrollmentError> {
    let full_name = required(&form.full_name, "fullName")?;
    let gender = Gender::parse(&form.gender)
        .ok_or_else(|| EnrollmentError::Validation(format!("unknown gender {:?}", form.gender)))?;
    let dob = NaiveDate::parse_from_str(form.date_of_birth.trim(), "%Y-%m-%d")
        .map_err(|_| EnrollmentError::Validation("dateOfBirth must be YYYY-MM-DD".into()))?;
    if let Ok(today) = NaiveDate::parse_from_str(today, "%Y-%m-%d") {
        if dob >= today {
            return Err(EnrollmentError::Validation("dateOfBirth must be in the past".into()));
        }
    }
    Ok(ValidForm {
        full_name,
        gender,
        date_of_birth: dob.format("%Y-%m-%d").to_string(),
        class_id: required(&form.class_id, "classId")?,
        section: required(&form.section, "section")?,
        father_name: required(&form.father_name, "fatherName")?,
        mother_name: required(&form.mother_name, "motherName")?,
    })
}

impl Enrollment {
    pub fn new() -> Self {
        Enrollment::default()
    }

    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    pub fn view(&self) -> EnrollmentView {
        EnrollmentView {
            state: self.state,
            has_capture: self.capture.is_some(),
            blocked_by: self.blocked_by.clone(),
            committed: self.committed.clone(),
        }
    }

    /// Opens the camera for a fresh draft, discarding any previous outcome.
    pub fn begin(&mut self) {
        *self = Enrollment {
            state: EnrollmentState::Capturing,
            ..Enrollment::default()
        };
    }

    pub fn capture(&mut self, image_data: &str) -> Result<(), EnrollmentError> {
        match self.state {
            EnrollmentState::Idle | EnrollmentState::Capturing => {}
            state => {
                return Err(EnrollmentError::WrongState {
                    action: "capture",
                    state,
                })
            }
        }
        let image = EncodedImage::parse(image_data)?;
        self.capture = Some(image);
        self.state = EnrollmentState::Captured;
        Ok(())
    }

    /// Drops the capture and any blocking verdict.
    pub fn retake(&mut self) -> Result<(), EnrollmentError> {
        match self.state {
            EnrollmentState::Captured | EnrollmentState::Blocked | EnrollmentState::Capturing => {
                self.capture = None;
                self.blocked_by = None;
                self.state = EnrollmentState::Capturing;
                Ok(())
            }
            state => Err(EnrollmentError::WrongState {
                action: "retake",
                state,
            }),
        }
    }

    pub async fn submit(
        &mut self,
        form: &EnrollmentForm,
        gateway: &MatcherGateway,
        store: &RecordStore,
        session: &TenantSession,
        today: &str,
        academic_year: Option<&str>,
    ) -> Result<SubmitOutcome, EnrollmentError> {
        match self.state {
            EnrollmentState::Blocked | EnrollmentState::Committed | EnrollmentState::Checking => {
                return Err(EnrollmentError::WrongState {
                    action: "submit",
                    state: self.state,
                });
            }
            _ => {}
        }
        let valid = validate(form, today)?;
        let Some(capture) = self.capture.clone() else {
            return Err(EnrollmentError::NoCapture);
        };

        let snap = store.load(session).await?;
        let class = snap
            .class(&valid.class_id)
            .ok_or_else(|| EnrollmentError::Validation(format!("unknown class {}", valid.class_id)))?;
        if !class.has_section(&valid.section) {
            return Err(EnrollmentError::Validation(format!(
                "class {} has no section {}",
                class.class_name, valid.section
            )));
        }

        self.state = EnrollmentState::Checking;
        match gateway.match_students(&capture, &snap.students).await {
            MatchResult::Matched(id) => {
                let Some(existing) = snap.student(&id).cloned() else {
                    // Gateway only returns ids from the population it was given.
                    self.state = EnrollmentState::Captured;
                    return Err(StoreError::UnknownStudent(id).into());
                };
                info!(existing = %existing.id, "enrollment blocked by existing face");
                self.blocked_by = Some(existing.clone());
                self.state = EnrollmentState::Blocked;
                Ok(SubmitOutcome::Blocked(existing))
            }
            MatchResult::NoMatch => {
                let mut id = new_student_id();
                while snap.student(&id).is_some() {
                    id = new_student_id();
                }
                let student = Student {
                    id,
                    full_name: valid.full_name,
                    gender: valid.gender,
                    date_of_birth: valid.date_of_birth,
                    class_id: valid.class_id,
                    section: valid.section,
                    father_name: valid.father_name,
                    mother_name: valid.mother_name,
                    face_reference: capture.to_data_url(),
                    registration_date: today.to_string(),
                };
                match store.add_student(session, student.clone(), academic_year).await {
                    Ok(fee) => {
                        self.committed = Some(student.clone());
                        self.state = EnrollmentState::Committed;
                        Ok(SubmitOutcome::Committed { student, fee })
                    }
                    Err(e) => {
                        self.state = EnrollmentState::Captured;
                        Err(e.into())
                    }
                }
            }
        }
    }
}
