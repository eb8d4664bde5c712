use crate::attendance::{AttendanceEvent, DateWindow};
use crate::eligibility::BacklogEntry;
use crate::error::EngineResult;
use crate::grade_scale::{GradeBand, GradeScale};
use crate::performance::GradedEntry;
use crate::results::{ExamInfo, ResultStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterInfo {
    pub id: String,
    pub number: i64,
    pub window: DateWindow,
}

/// A published result joined with its exam, course and exam type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedResult {
    pub result_id: String,
    pub semester_id: String,
    pub course_id: String,
    pub exam_type_id: String,
    pub credits: f64,
    pub weightage: f64,
    pub percentage: Option<f64>,
    pub result_status: ResultStatus,
    pub published_at: Option<DateTime<Utc>>,
}

impl PublishedResult {
    pub fn graded(&self) -> GradedEntry {
        GradedEntry {
            result_id: self.result_id.clone(),
            semester_id: self.semester_id.clone(),
            course_id: self.course_id.clone(),
            credits: self.credits,
            weightage: self.weightage,
            percentage: self.percentage,
            result_status: self.result_status,
        }
    }

    pub fn backlog(&self) -> BacklogEntry {
        BacklogEntry {
            result_id: self.result_id.clone(),
            course_id: self.course_id.clone(),
            exam_type_id: self.exam_type_id.clone(),
            result_status: self.result_status,
            published_at: self.published_at,
        }
    }
}

/// Reads the engine needs from whatever owns reference data and raw events.
pub trait RecordSource {
    fn find_exam(&self, exam_id: &str) -> EngineResult<ExamInfo>;

    fn find_grade_bands(&self) -> EngineResult<Vec<GradeBand>>;

    fn find_attendance_events(
        &self,
        student_id: &str,
        course_id: &str,
        window: &DateWindow,
    ) -> EngineResult<Vec<AttendanceEvent>>;

    fn find_present_status_ids(&self) -> EngineResult<BTreeSet<String>>;

    fn find_semester(&self, semester_id: &str) -> EngineResult<SemesterInfo>;

    /// Published results for a student, limited to one semester when given.
    fn find_published_results(
        &self,
        student_id: &str,
        semester_id: Option<&str>,
    ) -> EngineResult<Vec<PublishedResult>>;

    fn grade_scale(&self) -> EngineResult<GradeScale> {
        GradeScale::new(self.find_grade_bands()?)
    }
}
