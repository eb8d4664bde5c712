use crate::error::{EngineError, EngineResult};
use crate::grade_scale::GradeScale;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pass,
    Fail,
    Absent,
    Malpractice,
    Withheld,
    Incomplete,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pass => "pass",
            ResultStatus::Fail => "fail",
            ResultStatus::Absent => "absent",
            ResultStatus::Malpractice => "malpractice",
            ResultStatus::Withheld => "withheld",
            ResultStatus::Incomplete => "incomplete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(ResultStatus::Pass),
            "fail" => Some(ResultStatus::Fail),
            "absent" => Some(ResultStatus::Absent),
            "malpractice" => Some(ResultStatus::Malpractice),
            "withheld" => Some(ResultStatus::Withheld),
            "incomplete" => Some(ResultStatus::Incomplete),
            _ => None,
        }
    }

    /// Statuses recorded by the examiner that processing must not overwrite.
    fn is_sticky(self) -> bool {
        matches!(self, ResultStatus::Absent | ResultStatus::Malpractice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevaluationStatus {
    NotApplicable,
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl RevaluationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RevaluationStatus::NotApplicable => "not_applicable",
            RevaluationStatus::Pending => "pending",
            RevaluationStatus::Approved => "approved",
            RevaluationStatus::Rejected => "rejected",
            RevaluationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_applicable" => Some(RevaluationStatus::NotApplicable),
            "pending" => Some(RevaluationStatus::Pending),
            "approved" => Some(RevaluationStatus::Approved),
            "rejected" => Some(RevaluationStatus::Rejected),
            "completed" => Some(RevaluationStatus::Completed),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: RevaluationStatus) -> bool {
        use RevaluationStatus::*;
        matches!(
            (self, next),
            (NotApplicable, Pending)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevaluationDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStage {
    Raw,
    Processed,
    Verified,
    Published,
}

impl ResultStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStage::Raw => "raw",
            ResultStage::Processed => "processed",
            ResultStage::Verified => "verified",
            ResultStage::Published => "published",
        }
    }
}

/// Exam reference data needed to process a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub exam_id: String,
    pub course_id: String,
    pub exam_type_id: String,
    pub semester_id: String,
    pub total_marks: f64,
    pub passing_marks: f64,
}

impl ExamInfo {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.total_marks.is_finite() || self.total_marks <= 0.0 {
            return Err(EngineError::validation("totalMarks", "must be positive"));
        }
        if !(0.0..=self.total_marks).contains(&self.passing_marks) {
            return Err(EngineError::validation(
                "passingMarks",
                "must be between 0 and totalMarks",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub id: String,
    pub student_id: String,
    pub exam_id: String,
    pub marks_obtained: f64,
    pub out_of_marks: f64,
    pub percentage: Option<f64>,
    pub grade_code: Option<String>,
    pub grade_points: Option<f64>,
    pub result_status: ResultStatus,
    pub processed: bool,
    pub is_verified: bool,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub is_published: bool,
    pub published_by: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub revaluation_requested: bool,
    pub revaluation_status: RevaluationStatus,
    pub revaluation_reason: Option<String>,
    pub previous_marks: Option<f64>,
    pub revaluation_remarks: Option<String>,
    pub revaluated_by: Option<String>,
    pub version: i64,
}

impl ExamResult {
    /// A freshly entered, unprocessed result. Only `absent`, `malpractice`
    /// and `withheld` are meaningful as entry statuses; anything else starts
    /// as `incomplete` until processing decides pass or fail.
    pub fn enter(
        id: impl Into<String>,
        student_id: impl Into<String>,
        exam: &ExamInfo,
        marks_obtained: f64,
        status: Option<ResultStatus>,
    ) -> EngineResult<Self> {
        exam.validate()?;
        let result = Self {
            id: id.into(),
            student_id: student_id.into(),
            exam_id: exam.exam_id.clone(),
            marks_obtained,
            out_of_marks: exam.total_marks,
            percentage: None,
            grade_code: None,
            grade_points: None,
            result_status: entry_status(status),
            processed: false,
            is_verified: false,
            verified_by: None,
            verified_at: None,
            is_published: false,
            published_by: None,
            published_at: None,
            revaluation_requested: false,
            revaluation_status: RevaluationStatus::NotApplicable,
            revaluation_reason: None,
            previous_marks: None,
            revaluation_remarks: None,
            revaluated_by: None,
            version: 0,
        };
        result.check_marks()?;
        Ok(result)
    }

    pub fn stage(&self) -> ResultStage {
        if self.is_published {
            ResultStage::Published
        } else if self.is_verified {
            ResultStage::Verified
        } else if self.processed {
            ResultStage::Processed
        } else {
            ResultStage::Raw
        }
    }

    fn illegal(&self, to: &str) -> EngineError {
        EngineError::InvalidStateTransition {
            entity: "exam_result",
            id: self.id.clone(),
            from: self.stage().as_str().to_string(),
            to: to.to_string(),
        }
    }

    /// Replaces the entered marks. Only possible before verification.
    pub fn reenter(
        &self,
        exam: &ExamInfo,
        marks_obtained: f64,
        status: Option<ResultStatus>,
    ) -> EngineResult<Self> {
        if self.is_verified {
            return Err(self.illegal("raw"));
        }
        if exam.exam_id != self.exam_id {
            return Err(EngineError::ExamNotFound {
                exam_id: self.exam_id.clone(),
            });
        }
        exam.validate()?;
        let next = Self {
            marks_obtained,
            out_of_marks: exam.total_marks,
            percentage: None,
            grade_code: None,
            grade_points: None,
            result_status: entry_status(status),
            processed: false,
            ..self.clone()
        };
        next.check_marks()?;
        Ok(next)
    }

    fn check_marks(&self) -> EngineResult<()> {
        if self.result_status == ResultStatus::Absent {
            return Ok(());
        }
        if !self.marks_obtained.is_finite() || self.marks_obtained < 0.0 {
            return Err(EngineError::NegativeMarks {
                result_id: self.id.clone(),
                marks: self.marks_obtained,
            });
        }
        if self.marks_obtained > self.out_of_marks {
            return Err(EngineError::MarksExceedTotal {
                result_id: self.id.clone(),
                marks: self.marks_obtained,
                total: self.out_of_marks,
            });
        }
        Ok(())
    }

    /// Computes percentage, pass/fail and grade from the exam definition.
    /// A verified result can only be reprocessed through revaluation.
    pub fn process(&self, exam: &ExamInfo, scale: &GradeScale) -> EngineResult<Self> {
        if self.is_verified {
            return Err(self.illegal("processed"));
        }
        self.apply_processing(exam, scale)
    }

    fn apply_processing(&self, exam: &ExamInfo, scale: &GradeScale) -> EngineResult<Self> {
        if exam.exam_id != self.exam_id {
            return Err(EngineError::ExamNotFound {
                exam_id: self.exam_id.clone(),
            });
        }
        exam.validate()?;

        let mut next = Self {
            out_of_marks: exam.total_marks,
            processed: true,
            ..self.clone()
        };
        next.check_marks()?;

        if next.result_status == ResultStatus::Absent {
            next.percentage = None;
            next.grade_code = None;
            next.grade_points = None;
            return Ok(next);
        }

        let percentage = next.marks_obtained * 100.0 / next.out_of_marks;
        if !next.result_status.is_sticky() {
            next.result_status = if next.marks_obtained >= exam.passing_marks {
                ResultStatus::Pass
            } else {
                ResultStatus::Fail
            };
        }
        let band = scale.resolve(percentage)?;
        next.percentage = Some(percentage);
        next.grade_code = Some(band.code.clone());
        next.grade_points = Some(band.grade_points);
        Ok(next)
    }

    pub fn verify(&self, evaluator_id: &str, at: DateTime<Utc>) -> EngineResult<Self> {
        if self.is_verified {
            return Err(EngineError::AlreadyVerified {
                result_id: self.id.clone(),
            });
        }
        if !self.processed {
            return Err(EngineError::NotProcessed {
                result_id: self.id.clone(),
            });
        }
        Ok(Self {
            is_verified: true,
            verified_by: Some(evaluator_id.to_string()),
            verified_at: Some(at),
            ..self.clone()
        })
    }

    pub fn publish(&self, publisher_id: &str, at: DateTime<Utc>) -> EngineResult<Self> {
        if self.is_published {
            return Err(EngineError::AlreadyPublished {
                result_id: self.id.clone(),
            });
        }
        if !self.is_verified {
            return Err(EngineError::NotVerified {
                result_id: self.id.clone(),
            });
        }
        Ok(Self {
            is_published: true,
            published_by: Some(publisher_id.to_string()),
            published_at: Some(at),
            ..self.clone()
        })
    }

    pub fn request_revaluation(&self, reason: &str) -> EngineResult<Self> {
        if self.revaluation_requested {
            return Err(EngineError::AlreadyRequested {
                result_id: self.id.clone(),
            });
        }
        if matches!(
            self.result_status,
            ResultStatus::Absent | ResultStatus::Malpractice
        ) {
            return Err(EngineError::IneligibleStatus {
                result_id: self.id.clone(),
                status: self.result_status.as_str().to_string(),
            });
        }
        if !self.processed {
            return Err(EngineError::NotProcessed {
                result_id: self.id.clone(),
            });
        }
        Ok(Self {
            revaluation_requested: true,
            revaluation_status: RevaluationStatus::Pending,
            revaluation_reason: Some(reason.trim().to_string()),
            previous_marks: Some(self.marks_obtained),
            ..self.clone()
        })
    }

    pub fn decide_revaluation(&self, decision: RevaluationDecision) -> EngineResult<Self> {
        let next = match decision {
            RevaluationDecision::Approved => RevaluationStatus::Approved,
            RevaluationDecision::Rejected => RevaluationStatus::Rejected,
        };
        if !self.revaluation_status.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                entity: "revaluation",
                id: self.id.clone(),
                from: self.revaluation_status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        Ok(Self {
            revaluation_status: next,
            ..self.clone()
        })
    }

    /// Applies the re-evaluated marks and reruns processing, which puts an
    /// unpublished result back to processed so the new marks are verified
    /// again. A published result keeps its flags. `previous_marks` keeps the
    /// marks recorded before the revaluation.
    pub fn complete_revaluation(
        &self,
        new_marks: f64,
        remarks: Option<&str>,
        evaluator_id: &str,
        exam: &ExamInfo,
        scale: &GradeScale,
    ) -> EngineResult<Self> {
        if self.revaluation_status != RevaluationStatus::Approved {
            return Err(EngineError::RevaluationNotApproved {
                result_id: self.id.clone(),
                current: self.revaluation_status.as_str().to_string(),
            });
        }
        let with_marks = Self {
            marks_obtained: new_marks,
            ..self.clone()
        };
        let mut next = with_marks.apply_processing(exam, scale)?;
        next.revaluation_status = RevaluationStatus::Completed;
        next.revaluation_remarks = remarks.map(|r| r.to_string());
        next.revaluated_by = Some(evaluator_id.to_string());
        if !next.is_published {
            next.is_verified = false;
            next.verified_by = None;
            next.verified_at = None;
        }
        Ok(next)
    }
}

fn entry_status(status: Option<ResultStatus>) -> ResultStatus {
    match status {
        Some(s @ (ResultStatus::Absent | ResultStatus::Malpractice | ResultStatus::Withheld)) => s,
        _ => ResultStatus::Incomplete,
    }
}

/// Invariants that hold for every write of an exam result, whatever
/// operation produced it.
pub fn check_save(prior: Option<&ExamResult>, next: &ExamResult) -> EngineResult<()> {
    if prior.map(|p| p.is_published).unwrap_or(false) && !next.is_published {
        return Err(EngineError::CannotUnpublish {
            result_id: next.id.clone(),
        });
    }
    if next.is_published && !next.is_verified {
        return Err(EngineError::NotVerified {
            result_id: next.id.clone(),
        });
    }
    next.check_marks()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade_scale::GradeBand;
    use proptest::prelude::*;

    fn scale() -> GradeScale {
        let band = |code: &str, lo: f64, hi: f64, gp: f64| GradeBand {
            code: code.into(),
            name: code.into(),
            lower_limit: lo,
            upper_limit: hi,
            grade_points: gp,
        };
        GradeScale::new(vec![
            band("O", 90.0, 100.0, 10.0),
            band("A", 60.0, 89.99, 8.0),
            band("C", 40.0, 59.99, 5.0),
            band("F", 0.0, 39.99, 0.0),
        ])
        .expect("scale")
    }

    fn exam() -> ExamInfo {
        ExamInfo {
            exam_id: "e1".into(),
            course_id: "c1".into(),
            exam_type_id: "see".into(),
            semester_id: "sem1".into(),
            total_marks: 100.0,
            passing_marks: 40.0,
        }
    }

    fn entered(marks: f64, status: Option<ResultStatus>) -> ExamResult {
        ExamResult::enter("r1", "s1", &exam(), marks, status).expect("enter")
    }

    fn processed(marks: f64) -> ExamResult {
        ExamResult::enter("r1", "s1", &exam(), marks, None)
            .expect("enter")
            .process(&exam(), &scale())
            .expect("process")
    }

    #[test]
    fn marks_at_passing_threshold_pass() {
        let r = processed(42.0);
        assert_eq!(r.result_status, ResultStatus::Pass);
        assert_eq!(r.percentage, Some(42.0));
        assert_eq!(r.out_of_marks, 100.0);
        assert_eq!(r.grade_code.as_deref(), Some("C"));
        assert_eq!(r.stage(), ResultStage::Processed);

        assert_eq!(processed(39.0).result_status, ResultStatus::Fail);
    }

    #[test]
    fn marks_above_total_are_rejected_at_entry() {
        let e = ExamResult::enter("r1", "s1", &exam(), 101.0, None).expect_err("exceeds");
        assert!(matches!(e, EngineError::MarksExceedTotal { total, .. } if total == 100.0));
        assert!(ExamResult::enter("r1", "s1", &exam(), -1.0, None).is_err());

        let raw = entered(60.0, None);
        assert_eq!(raw.out_of_marks, 100.0);
        assert!(matches!(
            raw.reenter(&exam(), 150.0, None),
            Err(EngineError::MarksExceedTotal { .. })
        ));
        let smaller = ExamInfo {
            total_marks: 50.0,
            passing_marks: 20.0,
            ..exam()
        };
        assert!(matches!(
            raw.reenter(&smaller, 60.0, None),
            Err(EngineError::MarksExceedTotal { .. })
        ));
        assert_eq!(raw.reenter(&smaller, 45.0, None).expect("reenter").out_of_marks, 50.0);
    }

    #[test]
    fn absent_skips_marks_and_grade() {
        let r = entered(150.0, Some(ResultStatus::Absent))
            .process(&exam(), &scale())
            .expect("process");
        assert_eq!(r.result_status, ResultStatus::Absent);
        assert_eq!(r.percentage, None);
        assert_eq!(r.grade_code, None);
    }

    #[test]
    fn malpractice_status_survives_processing() {
        let r = entered(80.0, Some(ResultStatus::Malpractice))
            .process(&exam(), &scale())
            .expect("process");
        assert_eq!(r.result_status, ResultStatus::Malpractice);
        assert_eq!(r.percentage, Some(80.0));
    }

    #[test]
    fn mismatched_exam_is_not_found() {
        let other = ExamInfo {
            exam_id: "other".into(),
            ..exam()
        };
        let r = ExamResult::enter("r1", "s1", &other, 50.0, None).expect("enter");
        assert!(matches!(
            r.process(&exam(), &scale()),
            Err(EngineError::ExamNotFound { .. })
        ));
        assert!(matches!(
            r.reenter(&exam(), 40.0, None),
            Err(EngineError::ExamNotFound { .. })
        ));
    }

    #[test]
    fn publish_requires_verification_once() {
        let now = Utc::now();
        let r = processed(55.0);
        assert!(matches!(
            r.publish("registrar", now),
            Err(EngineError::NotVerified { .. })
        ));
        let verified = r.verify("evaluator", now).expect("verify");
        assert!(matches!(
            verified.verify("evaluator", now),
            Err(EngineError::AlreadyVerified { .. })
        ));
        let published = verified.publish("registrar", now).expect("publish");
        assert_eq!(published.stage(), ResultStage::Published);
        assert!(matches!(
            published.publish("registrar", now),
            Err(EngineError::AlreadyPublished { .. })
        ));
        assert!(matches!(
            published.process(&exam(), &scale()),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn verify_requires_processing() {
        let r = entered(50.0, None);
        assert!(matches!(
            r.verify("evaluator", Utc::now()),
            Err(EngineError::NotProcessed { .. })
        ));
    }

    #[test]
    fn absent_result_cannot_request_revaluation() {
        let r = entered(0.0, Some(ResultStatus::Absent))
            .process(&exam(), &scale())
            .expect("process");
        assert!(matches!(
            r.request_revaluation("recount"),
            Err(EngineError::IneligibleStatus { .. })
        ));
    }

    #[test]
    fn revaluation_flow_reprocesses_marks() {
        let now = Utc::now();
        let published = processed(35.0)
            .verify("ev", now)
            .expect("verify")
            .publish("reg", now)
            .expect("publish");
        assert_eq!(published.result_status, ResultStatus::Fail);

        let requested = published.request_revaluation("recount").expect("request");
        assert_eq!(requested.previous_marks, Some(35.0));
        assert!(matches!(
            requested.request_revaluation("again"),
            Err(EngineError::AlreadyRequested { .. })
        ));
        assert!(matches!(
            requested.complete_revaluation(45.0, None, "ev2", &exam(), &scale()),
            Err(EngineError::RevaluationNotApproved { .. })
        ));

        let done = requested
            .decide_revaluation(RevaluationDecision::Approved)
            .expect("approve")
            .complete_revaluation(45.0, Some("totals corrected"), "ev2", &exam(), &scale())
            .expect("complete");
        assert_eq!(done.revaluation_status, RevaluationStatus::Completed);
        assert_eq!(done.marks_obtained, 45.0);
        assert_eq!(done.result_status, ResultStatus::Pass);
        assert_eq!(done.previous_marks, Some(35.0));
        assert!(done.is_published);
        assert!(check_save(Some(&published), &done).is_ok());
    }

    #[test]
    fn revaluation_before_publication_needs_fresh_verification() {
        let now = Utc::now();
        let verified = processed(35.0).verify("ev", now).expect("verify");
        let done = verified
            .request_revaluation("recount")
            .expect("request")
            .decide_revaluation(RevaluationDecision::Approved)
            .expect("approve")
            .complete_revaluation(62.0, None, "ev2", &exam(), &scale())
            .expect("complete");
        assert_eq!(done.stage(), ResultStage::Processed);
        assert_eq!(done.grade_code.as_deref(), Some("A"));
        assert_eq!(done.verified_by, None);
        assert!(matches!(
            done.publish("reg", now),
            Err(EngineError::NotVerified { .. })
        ));
        let reverified = done.verify("ev3", now).expect("verify again");
        assert!(reverified.publish("reg", now).is_ok());
    }

    #[test]
    fn rejected_revaluation_is_final() {
        let r = processed(50.0)
            .request_revaluation("recount")
            .expect("request")
            .decide_revaluation(RevaluationDecision::Rejected)
            .expect("reject");
        assert!(r.decide_revaluation(RevaluationDecision::Approved).is_err());
        assert!(matches!(
            r.request_revaluation("again"),
            Err(EngineError::AlreadyRequested { .. })
        ));
    }

    #[test]
    fn save_rejects_unpublish() {
        let now = Utc::now();
        let published = processed(70.0)
            .verify("ev", now)
            .expect("verify")
            .publish("reg", now)
            .expect("publish");
        let flipped = ExamResult {
            is_published: false,
            ..published.clone()
        };
        assert!(matches!(
            check_save(Some(&published), &flipped),
            Err(EngineError::CannotUnpublish { .. })
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Process,
        Verify,
        Publish,
        Reenter(f64),
        Request,
        Approve,
        Reject,
        Complete(f64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Process),
            Just(Op::Verify),
            Just(Op::Publish),
            (0.0f64..=100.0).prop_map(Op::Reenter),
            Just(Op::Request),
            Just(Op::Approve),
            Just(Op::Reject),
            (0.0f64..=100.0).prop_map(Op::Complete),
        ]
    }

    proptest! {
        #[test]
        fn publication_never_reverts(ops in proptest::collection::vec(op(), 1..24)) {
            let now = Utc::now();
            let mut current = entered(50.0, None);
            let mut was_published = false;
            for o in ops {
                let attempt = match o {
                    Op::Process => current.process(&exam(), &scale()),
                    Op::Verify => current.verify("ev", now),
                    Op::Publish => current.publish("reg", now),
                    Op::Reenter(m) => current.reenter(&exam(), m, None),
                    Op::Request => current.request_revaluation("why"),
                    Op::Approve => current.decide_revaluation(RevaluationDecision::Approved),
                    Op::Reject => current.decide_revaluation(RevaluationDecision::Rejected),
                    Op::Complete(m) => current.complete_revaluation(m, None, "ev", &exam(), &scale()),
                };
                if let Ok(next) = attempt {
                    prop_assert!(check_save(Some(&current), &next).is_ok());
                    current = next;
                }
                was_published |= current.is_published;
                prop_assert_eq!(current.is_published, was_published);
                if current.result_status != ResultStatus::Absent {
                    prop_assert!(current.marks_obtained <= current.out_of_marks);
                }
            }
        }
    }
}
