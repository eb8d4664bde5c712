use crate::batch::{self, StudentImportRow};
use crate::ipc::helpers::{get_optional_usize, get_parsed, get_required_i64, to_json, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn handle_promote(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let student_ids: Vec<String> = get_parsed(params, "studentIds")?;
        if student_ids.is_empty() {
            return Err(HandlerErr::bad_params("studentIds must not be empty"));
        }
        let from = get_required_i64(params, "fromSemester")?;
        let to = get_required_i64(params, "toSemester")?;
        let threshold = get_optional_usize(params, "backlogThreshold")?
            .unwrap_or(policy.backlog_threshold);
        let report = batch::promote_students(conn, &student_ids, from, to, threshold)?;
        to_json(&report)
    })
}

fn handle_import_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| {
        let rows: Vec<StudentImportRow> = get_parsed(params, "rows")?;
        let report = batch::import_students(conn, &rows)?;
        to_json(&report)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batch.promote" => Some(handle_promote(state, req)),
        "batch.importStudents" => Some(handle_import_students(state, req)),
        _ => None,
    }
}
