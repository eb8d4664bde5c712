use crate::attendance::AttendanceSummary;
use crate::results::ResultStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published result as seen by backlog counting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogEntry {
    pub result_id: String,
    pub course_id: String,
    pub exam_type_id: String,
    pub result_status: ResultStatus,
    pub published_at: Option<DateTime<Utc>>,
}

fn is_backlog_status(s: ResultStatus) -> bool {
    matches!(s, ResultStatus::Fail | ResultStatus::Incomplete)
}

/// Failed or incomplete published results that no later `pass` for the same
/// course and exam type has cleared.
pub fn open_backlogs(history: &[BacklogEntry]) -> Vec<&BacklogEntry> {
    history
        .iter()
        .filter(|b| is_backlog_status(b.result_status))
        .filter(|b| {
            !history.iter().any(|c| {
                c.result_status == ResultStatus::Pass
                    && c.course_id == b.course_id
                    && c.exam_type_id == b.exam_type_id
                    && c.published_at >= b.published_at
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PromotionDecision {
    #[serde(rename_all = "camelCase")]
    Eligible { backlog_count: usize },
    #[serde(rename_all = "camelCase")]
    Ineligible {
        reason: String,
        backlog_count: Option<usize>,
    },
}

impl PromotionDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, PromotionDecision::Eligible { .. })
    }
}

/// `current_semester` is the student's recorded semester when known.
pub fn evaluate_promotion(
    student_id: &str,
    from_semester: i64,
    to_semester: i64,
    backlog_threshold: usize,
    current_semester: Option<i64>,
    history: &[BacklogEntry],
) -> PromotionDecision {
    if to_semester != from_semester + 1 {
        return PromotionDecision::Ineligible {
            reason: format!(
                "promotion must be to the next semester: {} -> {} is not sequential",
                from_semester, to_semester
            ),
            backlog_count: None,
        };
    }
    if let Some(current) = current_semester {
        if current != from_semester {
            return PromotionDecision::Ineligible {
                reason: format!(
                    "student {} is in semester {}, not {}",
                    student_id, current, from_semester
                ),
                backlog_count: None,
            };
        }
    }
    let backlog_count = open_backlogs(history).len();
    if backlog_count > backlog_threshold {
        return PromotionDecision::Ineligible {
            reason: format!(
                "{} open backlogs exceed the allowed {}",
                backlog_count, backlog_threshold
            ),
            backlog_count: Some(backlog_count),
        };
    }
    PromotionDecision::Eligible { backlog_count }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    pub course_id: String,
    pub admitted: bool,
    pub effective_percentage: Option<f64>,
    pub required_percentage: f64,
    pub reason: Option<String>,
}

/// Exam admission is exactly the summary's eligibility.
pub fn exam_admission(summary: &AttendanceSummary) -> AdmissionDecision {
    let admitted = summary.is_eligible();
    let reason = if admitted {
        None
    } else {
        Some(match summary.effective_percentage() {
            Some(p) => format!(
                "attendance {:.2}% is below the required {:.2}%",
                p, summary.required_percentage
            ),
            None => "no classes recorded".to_string(),
        })
    };
    AdmissionDecision {
        course_id: summary.key.course_id.clone(),
        admitted,
        effective_percentage: summary.effective_percentage(),
        required_percentage: summary.required_percentage,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::{CondonationStatus, SummaryKey};
    use chrono::TimeZone;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2025, 5, day, 10, 0, 0).single()
    }

    fn entry(id: &str, course: &str, status: ResultStatus, day: u32) -> BacklogEntry {
        BacklogEntry {
            result_id: id.into(),
            course_id: course.into(),
            exam_type_id: "see".into(),
            result_status: status,
            published_at: at(day),
        }
    }

    #[test]
    fn skipping_a_semester_is_rejected_regardless_of_backlogs() {
        let d = evaluate_promotion("s1", 3, 5, 10, Some(3), &[]);
        match d {
            PromotionDecision::Ineligible { reason, .. } => assert!(reason.contains("sequential")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn backlogs_over_threshold_block_promotion() {
        let history = vec![
            entry("r1", "MATH", ResultStatus::Fail, 1),
            entry("r2", "PHY", ResultStatus::Incomplete, 1),
            entry("r3", "CHEM", ResultStatus::Pass, 1),
        ];
        assert!(!evaluate_promotion("s1", 3, 4, 1, Some(3), &history).is_eligible());
        assert_eq!(
            evaluate_promotion("s1", 3, 4, 2, Some(3), &history),
            PromotionDecision::Eligible { backlog_count: 2 }
        );
    }

    #[test]
    fn later_pass_clears_backlog() {
        let history = vec![
            entry("r1", "MATH", ResultStatus::Fail, 1),
            entry("r2", "MATH", ResultStatus::Pass, 20),
        ];
        assert!(open_backlogs(&history).is_empty());

        let stale_pass = vec![
            entry("r1", "MATH", ResultStatus::Pass, 1),
            entry("r2", "MATH", ResultStatus::Fail, 20),
        ];
        assert_eq!(open_backlogs(&stale_pass).len(), 1);
    }

    #[test]
    fn wrong_current_semester_is_ineligible() {
        assert!(!evaluate_promotion("s1", 3, 4, 5, Some(2), &[]).is_eligible());
    }

    #[test]
    fn admission_mirrors_summary_eligibility() {
        let summary = AttendanceSummary {
            key: SummaryKey {
                student_id: "s1".into(),
                course_id: "c1".into(),
                semester_id: "sem".into(),
            },
            total_classes: 40,
            attended: 28,
            condonation_applied: true,
            condonation_status: CondonationStatus::Approved,
            condonation_percentage: 5.0,
            condonation_reason: Some("medical".into()),
            condonation_decided_by: Some("hod".into()),
            required_percentage: 75.0,
            version: 1,
        };
        let d = exam_admission(&summary);
        assert!(d.admitted);
        assert_eq!(d.admitted, summary.is_eligible());
        assert_eq!(d.effective_percentage, Some(75.0));

        let short = AttendanceSummary {
            condonation_status: CondonationStatus::Rejected,
            ..summary
        };
        let d = exam_admission(&short);
        assert!(!d.admitted);
        assert!(d.reason.is_some());
    }
}
