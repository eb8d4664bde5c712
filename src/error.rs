use serde::Serialize;
use serde_json::json;

/// Broad failure classes. The IPC layer and batch reports group on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ReferenceNotFound,
    InvalidStateTransition,
    Configuration,
    Conflict,
    Storage,
}

/// Every failure the engine can report. Variants carry the entity id and the
/// state involved so callers can log and respond without re-reading records.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("marks {marks} exceed exam total {total} for result {result_id}")]
    MarksExceedTotal {
        result_id: String,
        marks: f64,
        total: f64,
    },

    #[error("negative marks {marks} for result {result_id}")]
    NegativeMarks { result_id: String, marks: f64 },

    #[error("{field} must be between 0 and 100, got {value}")]
    PercentageOutOfRange { field: &'static str, value: f64 },

    #[error("invalid grade band {code}: {message}")]
    InvalidGradeBand { code: String, message: String },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("exam {exam_id} not found")]
    ExamNotFound { exam_id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("no grade band covers {percentage}%")]
    NoMatchingGradeBand { percentage: f64 },

    #[error("result {result_id} has not been processed")]
    NotProcessed { result_id: String },

    #[error("result {result_id} is already verified")]
    AlreadyVerified { result_id: String },

    #[error("result {result_id} must be verified before publishing")]
    NotVerified { result_id: String },

    #[error("result {result_id} is already published")]
    AlreadyPublished { result_id: String },

    #[error("result {result_id} is published and cannot be unpublished")]
    CannotUnpublish { result_id: String },

    #[error("revaluation already requested for result {result_id}")]
    AlreadyRequested { result_id: String },

    #[error("result {result_id} with status {status} is not eligible for revaluation")]
    IneligibleStatus { result_id: String, status: String },

    #[error("revaluation for result {result_id} is {current}, not approved")]
    RevaluationNotApproved { result_id: String, current: String },

    #[error("{entity} {id}: cannot move from {from} to {to}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("{entity} {id} was modified concurrently (expected version {expected})")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            MarksExceedTotal { .. }
            | NegativeMarks { .. }
            | PercentageOutOfRange { .. }
            | InvalidGradeBand { .. }
            | Validation { .. } => ErrorKind::Validation,
            ExamNotFound { .. } | NotFound { .. } => ErrorKind::ReferenceNotFound,
            NoMatchingGradeBand { .. } => ErrorKind::Configuration,
            NotProcessed { .. }
            | AlreadyVerified { .. }
            | NotVerified { .. }
            | AlreadyPublished { .. }
            | CannotUnpublish { .. }
            | AlreadyRequested { .. }
            | IneligibleStatus { .. }
            | RevaluationNotApproved { .. }
            | InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            VersionConflict { .. } | Duplicate { .. } => ErrorKind::Conflict,
            Storage(_) => ErrorKind::Storage,
        }
    }

    /// Stable code surfaced over IPC.
    pub fn code(&self) -> &'static str {
        use EngineError::*;
        match self {
            MarksExceedTotal { .. } => "marks_exceed_total",
            NegativeMarks { .. } => "negative_marks",
            PercentageOutOfRange { .. } => "percentage_out_of_range",
            InvalidGradeBand { .. } => "invalid_grade_band",
            Validation { .. } => "bad_params",
            ExamNotFound { .. } => "exam_not_found",
            NotFound { .. } => "not_found",
            NoMatchingGradeBand { .. } => "no_matching_grade_band",
            NotProcessed { .. } => "not_processed",
            AlreadyVerified { .. } => "already_verified",
            NotVerified { .. } => "not_verified",
            AlreadyPublished { .. } => "already_published",
            CannotUnpublish { .. } => "cannot_unpublish",
            AlreadyRequested { .. } => "already_requested",
            IneligibleStatus { .. } => "ineligible_status",
            RevaluationNotApproved { .. } => "revaluation_not_approved",
            InvalidStateTransition { .. } => "invalid_state_transition",
            VersionConflict { .. } => "version_conflict",
            Duplicate { .. } => "duplicate",
            Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        use EngineError::*;
        let fields = match self {
            MarksExceedTotal {
                result_id,
                marks,
                total,
            } => json!({ "resultId": result_id, "marks": marks, "total": total }),
            NegativeMarks { result_id, marks } => json!({ "resultId": result_id, "marks": marks }),
            PercentageOutOfRange { field, value } => json!({ "field": field, "value": value }),
            InvalidGradeBand { code, .. } => json!({ "gradeCode": code }),
            Validation { field, .. } => json!({ "field": field }),
            ExamNotFound { exam_id } => json!({ "examId": exam_id }),
            NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            NoMatchingGradeBand { percentage } => json!({ "percentage": percentage }),
            NotProcessed { result_id }
            | AlreadyVerified { result_id }
            | NotVerified { result_id }
            | AlreadyPublished { result_id }
            | CannotUnpublish { result_id }
            | AlreadyRequested { result_id } => json!({ "resultId": result_id }),
            IneligibleStatus { result_id, status } => {
                json!({ "resultId": result_id, "status": status })
            }
            RevaluationNotApproved { result_id, current } => {
                json!({ "resultId": result_id, "revaluationStatus": current })
            }
            InvalidStateTransition {
                entity,
                id,
                from,
                to,
            } => json!({ "entity": entity, "id": id, "from": from, "to": to }),
            VersionConflict {
                entity,
                id,
                expected,
            } => json!({ "entity": entity, "id": id, "expectedVersion": expected }),
            Duplicate { entity, id } => json!({ "entity": entity, "id": id }),
            Storage(_) => json!({}),
        };
        let mut out = fields;
        out["kind"] = json!(self.kind());
        out
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
