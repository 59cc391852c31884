//! Free-form questions about the school data, answered by the text model.

use crate::model::Amount;
use crate::provider::{GenerateRequest, RecognitionProvider};
use crate::store::snapshot::Snapshot;
use serde::Serialize;
use tracing::warn;

pub const EMPTY_REPLY: &str = "I apologize, I'm having trouble processing that data right now.";
pub const FAILED_REPLY: &str =
    "I encountered an error connecting to the assistant. Please try again in a moment.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassContext {
    pub name: String,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Financials {
    pub collected: Amount,
    pub total_due: Amount,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContext {
    pub student_count: usize,
    pub classes: Vec<ClassContext>,
    pub attendance_today: usize,
    pub financials: Financials,
}

impl DataContext {
    pub fn from_snapshot(snap: &Snapshot, today: &str) -> Self {
        DataContext {
            student_count: snap.students.len(),
            classes: snap
                .classes
                .iter()
                .map(|c| ClassContext {
                    name: c.class_name.clone(),
                    student_count: snap.students.iter().filter(|s| s.class_id == c.id).count(),
                })
                .collect(),
            attendance_today: snap.attendance_on(today).count(),
            financials: Financials {
                collected: snap.payments.iter().map(|p| p.amount_paid).sum(),
                total_due: snap.student_fees.iter().map(|f| f.balance()).sum(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub reply: String,
    pub degraded: bool,
}

fn prompt(school_name: &str, context: &DataContext, question: &str) -> String {
    let summary = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are a professional administrative assistant for {school_name}, using a school management system.\n\n\
         Current school data summary:\n{summary}\n\n\
         Guidelines:\n\
         1. Answer accurately based on the data provided above.\n\
         2. Be professional, concise and helpful.\n\
         3. If the question is about something not in the data, explain that you only have access to current registration, attendance and fee records.\n\
         4. Format numbers and currency clearly.\n\n\
         User question: {question}"
    )
}

/// Never fails: provider trouble yields a fixed apology marked `degraded`.
pub async fn ask(
    provider: &dyn RecognitionProvider,
    school_name: &str,
    snap: &Snapshot,
    today: &str,
    question: &str,
) -> Answer {
    let context = DataContext::from_snapshot(snap, today);
    let request = GenerateRequest {
        prompt: prompt(school_name, &context, question.trim()),
        ..GenerateRequest::default()
    };
    match provider.generate(&request).await {
        Ok(text) if !text.trim().is_empty() => Answer {
            reply: text.trim().to_string(),
            degraded: false,
        },
        Ok(_) => Answer {
            reply: EMPTY_REPLY.to_string(),
            degraded: true,
        },
        Err(e) => {
            warn!(class = e.class(), error = %e, "assistant request failed");
            Answer {
                reply: FAILED_REPLY.to_string(),
                degraded: true,
            }
        }
    }
}
