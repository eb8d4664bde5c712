use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_REQUIRED_PERCENTAGE: f64 = 75.0;

/// One raw attendance mark. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEvent {
    pub student_id: String,
    pub course_id: String,
    pub date: NaiveDate,
    pub status_id: String,
}

/// Inclusive date range of a semester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryKey {
    pub student_id: String,
    pub course_id: String,
    pub semester_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondonationStatus {
    NotApplicable,
    Pending,
    Approved,
    Rejected,
}

impl CondonationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CondonationStatus::NotApplicable => "not_applicable",
            CondonationStatus::Pending => "pending",
            CondonationStatus::Approved => "approved",
            CondonationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_applicable" => Some(CondonationStatus::NotApplicable),
            "pending" => Some(CondonationStatus::Pending),
            "approved" => Some(CondonationStatus::Approved),
            "rejected" => Some(CondonationStatus::Rejected),
            _ => None,
        }
    }

    /// The whole condonation state machine. A rejected request may be filed
    /// again; an approved one is final.
    pub fn can_transition_to(self, next: CondonationStatus) -> bool {
        use CondonationStatus::*;
        matches!(
            (self, next),
            (NotApplicable, Pending)
                | (Rejected, Pending)
                | (Pending, Approved)
                | (Pending, Rejected)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondonationDecision {
    Approved,
    Rejected,
}

impl From<CondonationDecision> for CondonationStatus {
    fn from(d: CondonationDecision) -> Self {
        match d {
            CondonationDecision::Approved => CondonationStatus::Approved,
            CondonationDecision::Rejected => CondonationStatus::Rejected,
        }
    }
}

/// Stored totals for one (student, course, semester). Percentages and
/// eligibility are never stored; they are computed from these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    #[serde(flatten)]
    pub key: SummaryKey,
    pub total_classes: u32,
    pub attended: u32,
    pub condonation_applied: bool,
    pub condonation_status: CondonationStatus,
    pub condonation_percentage: f64,
    pub condonation_reason: Option<String>,
    pub condonation_decided_by: Option<String>,
    pub required_percentage: f64,
    pub version: i64,
}

/// Summary plus every derived value, as handed to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReport {
    #[serde(flatten)]
    pub summary: AttendanceSummary,
    pub percentage: Option<f64>,
    pub effective_percentage: Option<f64>,
    pub is_eligible: bool,
    pub shortage_percentage: Option<f64>,
    pub required_sessions: Option<u32>,
}

fn check_percentage(field: &'static str, value: f64) -> EngineResult<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(EngineError::PercentageOutOfRange { field, value });
    }
    Ok(())
}

/// Rebuilds totals from the full event set. Condonation fields and the
/// stored version carry over from `prior`; totals never accumulate.
pub fn recompute(
    key: SummaryKey,
    events: &[AttendanceEvent],
    window: &DateWindow,
    present_status_ids: &BTreeSet<String>,
    required_percentage: f64,
    prior: Option<&AttendanceSummary>,
) -> EngineResult<AttendanceSummary> {
    check_percentage("requiredPercentage", required_percentage)?;

    let in_scope = events.iter().filter(|e| {
        e.student_id == key.student_id && e.course_id == key.course_id && window.contains(e.date)
    });
    let mut total_classes: u32 = 0;
    let mut attended: u32 = 0;
    for e in in_scope {
        total_classes += 1;
        if present_status_ids.contains(&e.status_id) {
            attended += 1;
        }
    }

    let summary = match prior {
        Some(p) => AttendanceSummary {
            key,
            total_classes,
            attended,
            required_percentage,
            ..p.clone()
        },
        None => AttendanceSummary {
            key,
            total_classes,
            attended,
            condonation_applied: false,
            condonation_status: CondonationStatus::NotApplicable,
            condonation_percentage: 0.0,
            condonation_reason: None,
            condonation_decided_by: None,
            required_percentage,
            version: 0,
        },
    };
    tracing::debug!(
        student = %summary.key.student_id,
        course = %summary.key.course_id,
        total_classes,
        attended,
        "attendance recomputed"
    );
    Ok(summary)
}

impl AttendanceSummary {
    /// Raw attendance percentage; undefined when no classes were held.
    pub fn percentage(&self) -> Option<f64> {
        if self.total_classes == 0 {
            return None;
        }
        Some(self.attended as f64 * 100.0 / self.total_classes as f64)
    }

    pub fn effective_percentage(&self) -> Option<f64> {
        let raw = self.percentage()?;
        if self.condonation_status == CondonationStatus::Approved {
            Some((raw + self.condonation_percentage).min(100.0))
        } else {
            Some(raw)
        }
    }

    /// A course with no classes held is not eligible.
    pub fn is_eligible(&self) -> bool {
        self.effective_percentage()
            .map(|p| p >= self.required_percentage)
            .unwrap_or(false)
    }

    pub fn shortage_percentage(&self) -> Option<f64> {
        self.effective_percentage()
            .map(|p| (self.required_percentage - p).max(0.0))
    }

    /// Best-case count of further sessions needed, assuming every one of
    /// them is attended. `None` when no classes were held yet, or when the
    /// requirement is 100% and a session has already been missed.
    pub fn required_sessions(&self) -> Option<u32> {
        let effective = self.effective_percentage()?;
        if effective >= self.required_percentage {
            return Some(0);
        }
        if self.required_percentage >= 100.0 {
            return None;
        }
        let needed = (self.required_percentage * self.total_classes as f64
            - 100.0 * self.attended as f64)
            / (100.0 - self.required_percentage);
        // Guard the ceiling against float noise on exact quotients.
        Some((needed - 1e-9).ceil().max(0.0) as u32)
    }

    pub fn report(&self) -> AttendanceReport {
        AttendanceReport {
            summary: self.clone(),
            percentage: self.percentage(),
            effective_percentage: self.effective_percentage(),
            is_eligible: self.is_eligible(),
            shortage_percentage: self.shortage_percentage(),
            required_sessions: self.required_sessions(),
        }
    }

    fn transition(&self, next: CondonationStatus) -> EngineResult<()> {
        if self.condonation_status.can_transition_to(next) {
            return Ok(());
        }
        Err(EngineError::InvalidStateTransition {
            entity: "attendance_summary",
            id: format!(
                "{}/{}/{}",
                self.key.student_id, self.key.course_id, self.key.semester_id
            ),
            from: self.condonation_status.as_str().to_string(),
            to: next.as_str().to_string(),
        })
    }

    pub fn apply_for_condonation(&self, reason: &str, percentage: f64) -> EngineResult<Self> {
        check_percentage("condonationPercentage", percentage)?;
        if reason.trim().is_empty() {
            return Err(EngineError::validation("reason", "reason must not be empty"));
        }
        self.transition(CondonationStatus::Pending)?;
        Ok(Self {
            condonation_applied: true,
            condonation_status: CondonationStatus::Pending,
            condonation_percentage: percentage,
            condonation_reason: Some(reason.trim().to_string()),
            condonation_decided_by: None,
            ..self.clone()
        })
    }

    pub fn process_condonation(
        &self,
        decision: CondonationDecision,
        decided_by: &str,
    ) -> EngineResult<Self> {
        let next = CondonationStatus::from(decision);
        self.transition(next)?;
        Ok(Self {
            condonation_status: next,
            condonation_decided_by: Some(decided_by.to_string()),
            ..self.clone()
        })
    }
}
