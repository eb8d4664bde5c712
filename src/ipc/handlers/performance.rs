use crate::ipc::helpers::{get_required_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::workflow;

fn handle_sgpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let student_id = get_required_str(params, "studentId")?;
        let semester_id = get_required_str(params, "semesterId")?;
        let perf = workflow::semester_performance(conn, policy, &student_id, &semester_id)?;
        to_json(&perf)
    })
}

fn handle_cgpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let student_id = get_required_str(params, "studentId")?;
        let perf = workflow::cumulative_performance(conn, policy, &student_id)?;
        to_json(&perf)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "performance.sgpa" => Some(handle_sgpa(state, req)),
        "performance.cgpa" => Some(handle_cgpa(state, req)),
        _ => None,
    }
}
