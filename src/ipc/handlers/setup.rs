use crate::error::EngineError;
use crate::grade_scale::{GradeBand, GradeScale};
use crate::ipc::helpers::{
    get_optional_str, get_parsed, get_required_f64, get_required_i64, get_required_str, to_json,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::results::ExamInfo;
use crate::source::RecordSource;
use crate::store::{parse_date, SqliteSource};
use crate::workflow::{ensure_exists, with_immediate_transaction};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

fn non_negative(field: &str, value: f64) -> Result<f64, HandlerErr> {
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::validation(field, "must be a non-negative number").into());
    }
    Ok(value)
}

/// Replaces the whole grade scale. The bands are validated together first,
/// so a bad band leaves the stored scale untouched.
fn grade_bands_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let bands: Vec<GradeBand> = get_parsed(params, "bands")?;
    if bands.is_empty() {
        return Err(HandlerErr::bad_params("bands must not be empty"));
    }
    let scale = GradeScale::new(bands)?;
    with_immediate_transaction(conn, |tx| {
        tx.execute("DELETE FROM grade_bands", [])?;
        for b in scale.bands() {
            tx.execute(
                "INSERT INTO grade_bands(code, name, lower_limit, upper_limit, grade_points)
                 VALUES(?, ?, ?, ?, ?)",
                (&b.code, &b.name, b.lower_limit, b.upper_limit, b.grade_points),
            )?;
        }
        Ok(())
    })?;
    let overlaps: Vec<serde_json::Value> = scale
        .overlaps()
        .into_iter()
        .map(|(a, b)| json!([a, b]))
        .collect();
    tracing::info!(bands = scale.bands().len(), overlaps = overlaps.len(), "grade scale replaced");
    Ok(json!({
        "bands": to_json(&scale.bands())?,
        "overlaps": overlaps
    }))
}

fn grade_bands_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let bands = SqliteSource::new(conn).find_grade_bands()?;
    Ok(json!({ "bands": to_json(&bands)? }))
}

fn semesters_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let number = get_required_i64(params, "number")?;
    if number < 1 {
        return Err(HandlerErr::bad_params("number must be at least 1"));
    }
    let start = parse_date("startDate", &get_required_str(params, "startDate")?)?;
    let end = parse_date("endDate", &get_required_str(params, "endDate")?)?;
    if end < start {
        return Err(EngineError::validation("endDate", "must not be before startDate").into());
    }
    conn.execute(
        "INSERT INTO semesters(id, number, start_date, end_date) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           number = excluded.number,
           start_date = excluded.start_date,
           end_date = excluded.end_date",
        (&id, number, start.to_string(), end.to_string()),
    )?;
    Ok(json!({ "id": id }))
}

fn courses_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let credits = non_negative("credits", get_required_f64(params, "credits")?)?;
    conn.execute(
        "INSERT INTO courses(id, code, name, credits) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           code = excluded.code,
           name = excluded.name,
           credits = excluded.credits",
        (&id, &code, &name, credits),
    )?;
    Ok(json!({ "id": id }))
}

fn exam_types_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let name = get_required_str(params, "name")?;
    let weightage = non_negative("weightage", get_required_f64(params, "weightage")?)?;
    conn.execute(
        "INSERT INTO exam_types(id, name, weightage) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           weightage = excluded.weightage",
        (&id, &name, weightage),
    )?;
    Ok(json!({ "id": id }))
}

fn exams_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam = ExamInfo {
        exam_id: get_required_str(params, "id")?,
        course_id: get_required_str(params, "courseId")?,
        exam_type_id: get_required_str(params, "examTypeId")?,
        semester_id: get_required_str(params, "semesterId")?,
        total_marks: get_required_f64(params, "totalMarks")?,
        passing_marks: get_required_f64(params, "passingMarks")?,
    };
    exam.validate()?;
    ensure_exists(conn, "courses", "course", &exam.course_id)?;
    ensure_exists(conn, "exam_types", "exam_type", &exam.exam_type_id)?;
    ensure_exists(conn, "semesters", "semester", &exam.semester_id)?;
    conn.execute(
        "INSERT INTO exams(id, course_id, exam_type_id, semester_id, total_marks, passing_marks)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           course_id = excluded.course_id,
           exam_type_id = excluded.exam_type_id,
           semester_id = excluded.semester_id,
           total_marks = excluded.total_marks,
           passing_marks = excluded.passing_marks",
        (
            &exam.exam_id,
            &exam.course_id,
            &exam.exam_type_id,
            &exam.semester_id,
            exam.total_marks,
            exam.passing_marks,
        ),
    )?;
    Ok(json!({ "id": exam.exam_id }))
}

fn status_types_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let name = get_required_str(params, "name")?;
    let counts_as_present = params
        .get("countsAsPresent")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing countsAsPresent"))?;
    conn.execute(
        "INSERT INTO attendance_status_types(id, name, counts_as_present) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           counts_as_present = excluded.counts_as_present",
        (&id, &name, counts_as_present as i64),
    )?;
    Ok(json!({ "id": id }))
}

fn students_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let usn = get_required_str(params, "usn")?.to_uppercase();
    let display_name = get_required_str(params, "displayName")?;
    let current_semester = get_required_i64(params, "currentSemester")?;
    if current_semester < 1 {
        return Err(HandlerErr::bad_params("currentSemester must be at least 1"));
    }
    let user_id = get_optional_str(params, "userId");
    if let Some(uid) = &user_id {
        ensure_exists(conn, "users", "user", uid)?;
    }
    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE usn = ? AND id <> ?",
            (&usn, &id),
            |r| r.get(0),
        )
        .optional()?;
    if clash.is_some() {
        return Err(EngineError::Duplicate {
            entity: "student",
            id: usn,
        }
        .into());
    }
    conn.execute(
        "INSERT INTO students(id, usn, user_id, display_name, current_semester, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           usn = excluded.usn,
           user_id = excluded.user_id,
           display_name = excluded.display_name,
           current_semester = excluded.current_semester,
           updated_at = excluded.updated_at",
        (
            &id,
            &usn,
            &user_id,
            &display_name,
            current_semester,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "id": id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRow {
    id: Option<String>,
    student_id: String,
    course_id: String,
    date: String,
    status_id: String,
}

/// Appends raw attendance marks. All rows land or none do.
fn attendance_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let rows: Vec<EventRow> = get_parsed(params, "events")?;
    let ids = with_immediate_transaction(conn, |tx| {
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let date = parse_date("date", &row.date)?;
            ensure_exists(tx, "students", "student", &row.student_id)?;
            ensure_exists(tx, "courses", "course", &row.course_id)?;
            ensure_exists(tx, "attendance_status_types", "attendance_status_type", &row.status_id)?;
            let id = row
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            tx.execute(
                "INSERT INTO attendance_events(id, student_id, course_id, date, status_id)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   date = excluded.date,
                   status_id = excluded.status_id",
                (&id, &row.student_id, &row.course_id, date.to_string(), &row.status_id),
            )?;
            ids.push(id);
        }
        Ok(ids)
    })?;
    tracing::debug!(count = ids.len(), "attendance events recorded");
    Ok(json!({ "recorded": ids.len(), "ids": ids }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| match req.method.as_str() {
        "gradeBands.set" => grade_bands_set(conn, params),
        "gradeBands.list" => grade_bands_list(conn),
        "semesters.upsert" => semesters_upsert(conn, params),
        "courses.upsert" => courses_upsert(conn, params),
        "examTypes.upsert" => exam_types_upsert(conn, params),
        "exams.upsert" => exams_upsert(conn, params),
        "attendanceStatusTypes.upsert" => status_types_upsert(conn, params),
        "students.upsert" => students_upsert(conn, params),
        "attendance.record" => attendance_record(conn, params),
        other => Err(HandlerErr::bad_params(format!("unroutable method {}", other))),
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradeBands.set"
        | "gradeBands.list"
        | "semesters.upsert"
        | "courses.upsert"
        | "examTypes.upsert"
        | "exams.upsert"
        | "attendanceStatusTypes.upsert"
        | "students.upsert"
        | "attendance.record" => Some(handle(state, req)),
        _ => None,
    }
}
