use crate::attendance::{
    AttendanceEvent, AttendanceSummary, CondonationStatus, DateWindow, SummaryKey,
};
use crate::error::{EngineError, EngineResult};
use crate::grade_scale::GradeBand;
use crate::results::{check_save, ExamInfo, ExamResult, ResultStatus, RevaluationStatus};
use crate::source::{PublishedResult, RecordSource, SemesterInfo};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(field: &str, raw: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| EngineError::validation(field, format!("expected YYYY-MM-DD, got {raw:?}")))
}

fn parse_timestamp(field: &str, raw: Option<String>) -> EngineResult<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| EngineError::validation(field, format!("bad timestamp {s:?}")))
    })
    .transpose()
}

fn timestamp(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339())
}

/// SQLite-backed reads. Works on a plain connection or inside a transaction.
pub struct SqliteSource<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSource<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl RecordSource for SqliteSource<'_> {
    fn find_exam(&self, exam_id: &str) -> EngineResult<ExamInfo> {
        self.conn
            .query_row(
                "SELECT id, course_id, exam_type_id, semester_id, total_marks, passing_marks
                 FROM exams WHERE id = ?",
                [exam_id],
                |r| {
                    Ok(ExamInfo {
                        exam_id: r.get(0)?,
                        course_id: r.get(1)?,
                        exam_type_id: r.get(2)?,
                        semester_id: r.get(3)?,
                        total_marks: r.get(4)?,
                        passing_marks: r.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| EngineError::ExamNotFound {
                exam_id: exam_id.to_string(),
            })
    }

    fn find_grade_bands(&self) -> EngineResult<Vec<GradeBand>> {
        let mut stmt = self.conn.prepare(
            "SELECT code, name, lower_limit, upper_limit, grade_points
             FROM grade_bands
             ORDER BY upper_limit DESC",
        )?;
        let bands = stmt
            .query_map([], |r| {
                Ok(GradeBand {
                    code: r.get(0)?,
                    name: r.get(1)?,
                    lower_limit: r.get(2)?,
                    upper_limit: r.get(3)?,
                    grade_points: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bands)
    }

    fn find_attendance_events(
        &self,
        student_id: &str,
        course_id: &str,
        window: &DateWindow,
    ) -> EngineResult<Vec<AttendanceEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, course_id, date, status_id
             FROM attendance_events
             WHERE student_id = ? AND course_id = ? AND date >= ? AND date <= ?
             ORDER BY date",
        )?;
        let rows = stmt
            .query_map(
                (
                    student_id,
                    course_id,
                    window.start_date.format(DATE_FORMAT).to_string(),
                    window.end_date.format(DATE_FORMAT).to_string(),
                ),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(student_id, course_id, date, status_id)| {
                Ok(AttendanceEvent {
                    student_id,
                    course_id,
                    date: parse_date("date", &date)?,
                    status_id,
                })
            })
            .collect()
    }

    fn find_present_status_ids(&self) -> EngineResult<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM attendance_status_types WHERE counts_as_present = 1")?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    fn find_semester(&self, semester_id: &str) -> EngineResult<SemesterInfo> {
        let row: Option<(String, i64, String, String)> = self
            .conn
            .query_row(
                "SELECT id, number, start_date, end_date FROM semesters WHERE id = ?",
                [semester_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((id, number, start, end)) = row else {
            return Err(EngineError::not_found("semester", semester_id));
        };
        Ok(SemesterInfo {
            id,
            number,
            window: DateWindow {
                start_date: parse_date("startDate", &start)?,
                end_date: parse_date("endDate", &end)?,
            },
        })
    }

    fn find_published_results(
        &self,
        student_id: &str,
        semester_id: Option<&str>,
    ) -> EngineResult<Vec<PublishedResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, e.semester_id, e.course_id, e.exam_type_id, c.credits, t.weightage,
                    r.percentage, r.result_status, r.published_at
             FROM exam_results r
             JOIN exams e ON e.id = r.exam_id
             JOIN courses c ON c.id = e.course_id
             JOIN exam_types t ON t.id = e.exam_type_id
             WHERE r.student_id = ?1
               AND r.is_published = 1
               AND (?2 IS NULL OR e.semester_id = ?2)
             ORDER BY r.published_at, r.id",
        )?;
        let rows = stmt
            .query_map((student_id, semester_id), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, f64>(5)?,
                    r.get::<_, Option<f64>>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(
                |(result_id, semester_id, course_id, exam_type_id, credits, weightage, percentage, status, published_at)| {
                    Ok(PublishedResult {
                        result_id,
                        semester_id,
                        course_id,
                        exam_type_id,
                        credits,
                        weightage,
                        percentage,
                        result_status: parse_result_status(&status)?,
                        published_at: parse_timestamp("publishedAt", published_at)?,
                    })
                },
            )
            .collect()
    }
}

fn parse_result_status(raw: &str) -> EngineResult<ResultStatus> {
    ResultStatus::parse(raw)
        .ok_or_else(|| EngineError::validation("resultStatus", format!("unknown status {raw:?}")))
}

// ---------------------------------------------------------------------------
// Attendance summaries

struct SummaryRow {
    key: SummaryKey,
    total_classes: u32,
    attended: u32,
    condonation_applied: bool,
    condonation_status: String,
    condonation_percentage: f64,
    condonation_reason: Option<String>,
    condonation_decided_by: Option<String>,
    required_percentage: f64,
    version: i64,
}

impl SummaryRow {
    fn into_summary(self) -> EngineResult<AttendanceSummary> {
        let condonation_status = CondonationStatus::parse(&self.condonation_status).ok_or_else(|| {
            EngineError::validation(
                "condonationStatus",
                format!("unknown status {:?}", self.condonation_status),
            )
        })?;
        Ok(AttendanceSummary {
            key: self.key,
            total_classes: self.total_classes,
            attended: self.attended,
            condonation_applied: self.condonation_applied,
            condonation_status,
            condonation_percentage: self.condonation_percentage,
            condonation_reason: self.condonation_reason,
            condonation_decided_by: self.condonation_decided_by,
            required_percentage: self.required_percentage,
            version: self.version,
        })
    }
}

const SUMMARY_COLUMNS: &str = "student_id, course_id, semester_id, total_classes, attended,
     condonation_applied, condonation_status, condonation_percentage, condonation_reason,
     condonation_decided_by, required_percentage, version";

fn summary_row(r: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok(SummaryRow {
        key: SummaryKey {
            student_id: r.get(0)?,
            course_id: r.get(1)?,
            semester_id: r.get(2)?,
        },
        total_classes: r.get(3)?,
        attended: r.get(4)?,
        condonation_applied: r.get::<_, i64>(5)? != 0,
        condonation_status: r.get(6)?,
        condonation_percentage: r.get(7)?,
        condonation_reason: r.get(8)?,
        condonation_decided_by: r.get(9)?,
        required_percentage: r.get(10)?,
        version: r.get(11)?,
    })
}

pub fn load_summary(conn: &Connection, key: &SummaryKey) -> EngineResult<Option<AttendanceSummary>> {
    let sql = format!(
        "SELECT {} FROM attendance_summaries
         WHERE student_id = ? AND course_id = ? AND semester_id = ?",
        SUMMARY_COLUMNS
    );
    conn.query_row(
        &sql,
        (&key.student_id, &key.course_id, &key.semester_id),
        summary_row,
    )
    .optional()?
    .map(SummaryRow::into_summary)
    .transpose()
}

pub fn list_summaries(
    conn: &Connection,
    student_id: &str,
    semester_id: &str,
) -> EngineResult<Vec<AttendanceSummary>> {
    let sql = format!(
        "SELECT {} FROM attendance_summaries
         WHERE student_id = ? AND semester_id = ?
         ORDER BY course_id",
        SUMMARY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((student_id, semester_id), summary_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SummaryRow::into_summary).collect()
}

/// Inserts a new summary (`version == 0`) or updates the stored one if its
/// version still matches. Returns the summary with its new version.
pub fn save_summary(conn: &Connection, summary: &AttendanceSummary) -> EngineResult<AttendanceSummary> {
    if summary.attended > summary.total_classes {
        return Err(EngineError::validation(
            "attended",
            "attended cannot exceed totalClasses",
        ));
    }
    let now = Utc::now().to_rfc3339();
    let next_version = summary.version + 1;
    let key = &summary.key;
    let changed = if summary.version == 0 {
        conn.execute(
            "INSERT INTO attendance_summaries(
                student_id, course_id, semester_id, total_classes, attended,
                condonation_applied, condonation_status, condonation_percentage,
                condonation_reason, condonation_decided_by, required_percentage,
                version, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(student_id, course_id, semester_id) DO NOTHING",
            rusqlite::params![
                key.student_id,
                key.course_id,
                key.semester_id,
                summary.total_classes,
                summary.attended,
                summary.condonation_applied as i64,
                summary.condonation_status.as_str(),
                summary.condonation_percentage,
                summary.condonation_reason,
                summary.condonation_decided_by,
                summary.required_percentage,
                next_version,
                now,
            ],
        )?
    } else {
        conn.execute(
            "UPDATE attendance_summaries
             SET total_classes = ?1, attended = ?2, condonation_applied = ?3,
                 condonation_status = ?4, condonation_percentage = ?5, condonation_reason = ?6,
                 condonation_decided_by = ?7, required_percentage = ?8,
                 version = ?9, updated_at = ?10
             WHERE student_id = ?11 AND course_id = ?12 AND semester_id = ?13 AND version = ?14",
            rusqlite::params![
                summary.total_classes,
                summary.attended,
                summary.condonation_applied as i64,
                summary.condonation_status.as_str(),
                summary.condonation_percentage,
                summary.condonation_reason,
                summary.condonation_decided_by,
                summary.required_percentage,
                next_version,
                now,
                key.student_id,
                key.course_id,
                key.semester_id,
                summary.version,
            ],
        )?
    };
    if changed == 0 {
        return Err(EngineError::VersionConflict {
            entity: "attendance_summary",
            id: format!("{}/{}/{}", key.student_id, key.course_id, key.semester_id),
            expected: summary.version,
        });
    }
    Ok(AttendanceSummary {
        version: next_version,
        ..summary.clone()
    })
}

// ---------------------------------------------------------------------------
// Exam results

const RESULT_COLUMNS: &str = "id, student_id, exam_id, marks_obtained, out_of_marks, percentage,
     grade_code, grade_points, result_status, processed, is_verified, verified_by, verified_at,
     is_published, published_by, published_at, revaluation_requested, revaluation_status,
     revaluation_reason, previous_marks, revaluation_remarks, revaluated_by, version";

struct ResultRow {
    result: ExamResult,
    result_status: String,
    revaluation_status: String,
    verified_at: Option<String>,
    published_at: Option<String>,
}

fn result_row(r: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        result: ExamResult {
            id: r.get(0)?,
            student_id: r.get(1)?,
            exam_id: r.get(2)?,
            marks_obtained: r.get(3)?,
            out_of_marks: r.get(4)?,
            percentage: r.get(5)?,
            grade_code: r.get(6)?,
            grade_points: r.get(7)?,
            result_status: ResultStatus::Incomplete,
            processed: r.get::<_, i64>(9)? != 0,
            is_verified: r.get::<_, i64>(10)? != 0,
            verified_by: r.get(11)?,
            verified_at: None,
            is_published: r.get::<_, i64>(13)? != 0,
            published_by: r.get(14)?,
            published_at: None,
            revaluation_requested: r.get::<_, i64>(16)? != 0,
            revaluation_status: RevaluationStatus::NotApplicable,
            revaluation_reason: r.get(18)?,
            previous_marks: r.get(19)?,
            revaluation_remarks: r.get(20)?,
            revaluated_by: r.get(21)?,
            version: r.get(22)?,
        },
        result_status: r.get(8)?,
        revaluation_status: r.get(17)?,
        verified_at: r.get(12)?,
        published_at: r.get(15)?,
    })
}

impl ResultRow {
    fn into_result(self) -> EngineResult<ExamResult> {
        let revaluation_status = RevaluationStatus::parse(&self.revaluation_status).ok_or_else(|| {
            EngineError::validation(
                "revaluationStatus",
                format!("unknown status {:?}", self.revaluation_status),
            )
        })?;
        Ok(ExamResult {
            result_status: parse_result_status(&self.result_status)?,
            revaluation_status,
            verified_at: parse_timestamp("verifiedAt", self.verified_at)?,
            published_at: parse_timestamp("publishedAt", self.published_at)?,
            ..self.result
        })
    }
}

pub fn load_result(conn: &Connection, result_id: &str) -> EngineResult<ExamResult> {
    let sql = format!("SELECT {} FROM exam_results WHERE id = ?", RESULT_COLUMNS);
    conn.query_row(&sql, [result_id], result_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("exam_result", result_id))?
        .into_result()
}

pub fn find_result_for(
    conn: &Connection,
    student_id: &str,
    exam_id: &str,
) -> EngineResult<Option<ExamResult>> {
    let sql = format!(
        "SELECT {} FROM exam_results WHERE student_id = ? AND exam_id = ?",
        RESULT_COLUMNS
    );
    conn.query_row(&sql, (student_id, exam_id), result_row)
        .optional()?
        .map(ResultRow::into_result)
        .transpose()
}

pub fn insert_result(conn: &Connection, result: &ExamResult) -> EngineResult<ExamResult> {
    check_save(None, result)?;
    if find_result_for(conn, &result.student_id, &result.exam_id)?.is_some() {
        return Err(EngineError::Duplicate {
            entity: "exam_result",
            id: format!("{}/{}", result.student_id, result.exam_id),
        });
    }
    let stored = ExamResult {
        version: 1,
        ..result.clone()
    };
    write_result(conn, &stored, None)?;
    Ok(stored)
}

/// Writes `next` over `prior`. Save invariants are checked first and the
/// write only lands if the stored version is still `prior.version`.
pub fn update_result(
    conn: &Connection,
    prior: &ExamResult,
    next: &ExamResult,
) -> EngineResult<ExamResult> {
    check_save(Some(prior), next)?;
    let stored = ExamResult {
        version: prior.version + 1,
        ..next.clone()
    };
    write_result(conn, &stored, Some(prior.version))?;
    Ok(stored)
}

fn write_result(conn: &Connection, r: &ExamResult, expected_version: Option<i64>) -> EngineResult<()> {
    let now = Utc::now().to_rfc3339();
    let values = rusqlite::params![
        r.id,
        r.student_id,
        r.exam_id,
        r.marks_obtained,
        r.out_of_marks,
        r.percentage,
        r.grade_code,
        r.grade_points,
        r.result_status.as_str(),
        r.processed as i64,
        r.is_verified as i64,
        r.verified_by,
        timestamp(r.verified_at),
        r.is_published as i64,
        r.published_by,
        timestamp(r.published_at),
        r.revaluation_requested as i64,
        r.revaluation_status.as_str(),
        r.revaluation_reason,
        r.previous_marks,
        r.revaluation_remarks,
        r.revaluated_by,
        r.version,
        now,
        expected_version,
    ];
    let changed = match expected_version {
        None => conn.execute(
            "INSERT INTO exam_results(
                id, student_id, exam_id, marks_obtained, out_of_marks, percentage,
                grade_code, grade_points, result_status, processed, is_verified, verified_by,
                verified_at, is_published, published_by, published_at, revaluation_requested,
                revaluation_status, revaluation_reason, previous_marks, revaluation_remarks,
                revaluated_by, version, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
             WHERE ?25 IS NULL",
            values,
        )?,
        Some(_) => conn.execute(
            "UPDATE exam_results
             SET student_id = ?2, exam_id = ?3, marks_obtained = ?4, out_of_marks = ?5,
                 percentage = ?6, grade_code = ?7, grade_points = ?8, result_status = ?9,
                 processed = ?10, is_verified = ?11, verified_by = ?12, verified_at = ?13,
                 is_published = ?14, published_by = ?15, published_at = ?16,
                 revaluation_requested = ?17, revaluation_status = ?18, revaluation_reason = ?19,
                 previous_marks = ?20, revaluation_remarks = ?21, revaluated_by = ?22,
                 version = ?23, updated_at = ?24
             WHERE id = ?1 AND version = ?25",
            values,
        )?,
    };
    if changed == 0 {
        return Err(EngineError::VersionConflict {
            entity: "exam_result",
            id: r.id.clone(),
            expected: expected_version.unwrap_or(0),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub id: String,
    pub usn: String,
    pub current_semester: i64,
}

pub fn load_student(conn: &Connection, student_id: &str) -> EngineResult<StudentRecord> {
    conn.query_row(
        "SELECT id, usn, current_semester FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRecord {
                id: r.get(0)?,
                usn: r.get(1)?,
                current_semester: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("student", student_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn seeded(prefix: &str) -> (PathBuf, Connection) {
        let ws = temp_dir(prefix);
        let conn = db::open_db(&ws).expect("open db");
        conn.execute_batch(
            "INSERT INTO semesters VALUES('sem1', 1, '2025-01-01', '2025-06-30');
             INSERT INTO courses VALUES('c1', 'MA101', 'Calculus', 4);
             INSERT INTO exam_types VALUES('see', 'Semester End', 60);
             INSERT INTO exams VALUES('e1', 'c1', 'see', 'sem1', 100, 40);
             INSERT INTO students(id, usn, display_name, current_semester)
                VALUES('s1', '1XX25CS001', 'Asha', 1);",
        )
        .expect("seed");
        (ws, conn)
    }

    fn entered(conn: &Connection, id: &str, marks: f64) -> ExamResult {
        let exam = SqliteSource::new(conn).find_exam("e1").expect("exam");
        ExamResult::enter(id, "s1", &exam, marks, None).expect("enter")
    }

    #[test]
    fn stale_version_is_rejected() {
        let (_ws, conn) = seeded("recordsd-store-version");
        let raw = entered(&conn, "r1", 50.0);
        let stored = insert_result(&conn, &raw).expect("insert");
        assert_eq!(stored.version, 1);

        let first = ExamResult {
            marks_obtained: 55.0,
            ..stored.clone()
        };
        update_result(&conn, &stored, &first).expect("first update");
        let e = update_result(&conn, &stored, &first).expect_err("stale");
        assert!(matches!(e, EngineError::VersionConflict { .. }));

        let loaded = load_result(&conn, "r1").expect("load");
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.marks_obtained, 55.0);
    }

    #[test]
    fn duplicate_student_exam_is_rejected() {
        let (_ws, conn) = seeded("recordsd-store-dup");
        let raw = entered(&conn, "r1", 50.0);
        insert_result(&conn, &raw).expect("insert");
        let again = entered(&conn, "r2", 60.0);
        assert!(matches!(
            insert_result(&conn, &again),
            Err(EngineError::Duplicate { .. })
        ));
    }

    #[test]
    fn trigger_blocks_raw_unpublish() {
        let (_ws, conn) = seeded("recordsd-store-trigger");
        let raw = entered(&conn, "r1", 50.0);
        insert_result(&conn, &raw).expect("insert");
        conn.execute("UPDATE exam_results SET is_published = 1 WHERE id = 'r1'", [])
            .expect("publish");
        assert!(conn
            .execute("UPDATE exam_results SET is_published = 0 WHERE id = 'r1'", [])
            .is_err());
    }

    #[test]
    fn reads_reference_data() {
        let (_ws, conn) = seeded("recordsd-store-source");
        let source = SqliteSource::new(&conn);
        let exam = source.find_exam("e1").expect("exam");
        assert_eq!(exam.total_marks, 100.0);
        assert!(matches!(
            source.find_exam("nope"),
            Err(EngineError::ExamNotFound { .. })
        ));
        let sem = source.find_semester("sem1").expect("semester");
        assert_eq!(sem.number, 1);
        assert!(source.find_semester("missing").is_err());
    }

    #[test]
    fn loads_student_record() {
        let (_ws, conn) = seeded("recordsd-store-student");
        let student = load_student(&conn, "s1").expect("student");
        assert_eq!(student.id, "s1");
        assert_eq!(student.usn, "1XX25CS001");
        assert_eq!(student.current_semester, 1);
        assert!(matches!(
            load_student(&conn, "ghost"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn summary_round_trips_with_version() {
        let (_ws, conn) = seeded("recordsd-store-summary");
        let key = SummaryKey {
            student_id: "s1".into(),
            course_id: "c1".into(),
            semester_id: "sem1".into(),
        };
        assert!(load_summary(&conn, &key).expect("load").is_none());
        let fresh = crate::attendance::recompute(
            key.clone(),
            &[],
            &DateWindow {
                start_date: parse_date("d", "2025-01-01").expect("date"),
                end_date: parse_date("d", "2025-06-30").expect("date"),
            },
            &BTreeSet::new(),
            75.0,
            None,
        )
        .expect("recompute");
        let saved = save_summary(&conn, &fresh).expect("save");
        assert_eq!(saved.version, 1);
        assert!(matches!(
            save_summary(&conn, &fresh),
            Err(EngineError::VersionConflict { .. })
        ));
        let loaded = load_summary(&conn, &key).expect("load").expect("present");
        assert_eq!(loaded, saved);
    }
}
