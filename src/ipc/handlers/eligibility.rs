use crate::ipc::helpers::{
    get_optional_str, get_optional_usize, get_required_i64, get_required_str, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow;
use serde_json::json;

fn handle_promotion(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let student_id = get_required_str(params, "studentId")?;
        let from = get_required_i64(params, "fromSemester")?;
        let to = get_required_i64(params, "toSemester")?;
        let threshold = get_optional_usize(params, "backlogThreshold")?
            .unwrap_or(policy.backlog_threshold);
        let decision = workflow::evaluate_promotion(conn, &student_id, from, to, threshold)?;
        to_json(&decision)
    })
}

fn handle_exam_admission(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| {
        let student_id = get_required_str(params, "studentId")?;
        let semester_id = get_required_str(params, "semesterId")?;
        let course_id = get_optional_str(params, "courseId");
        let courses =
            workflow::exam_admission(conn, &student_id, &semester_id, course_id.as_deref())?;
        Ok(json!({
            "studentId": student_id,
            "semesterId": semester_id,
            "courses": to_json(&courses)?
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "eligibility.promotion" => Some(handle_promotion(state, req)),
        "eligibility.examAdmission" => Some(handle_exam_admission(state, req)),
        _ => None,
    }
}
