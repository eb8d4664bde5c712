use crate::ipc::helpers::{
    get_optional_parsed, get_optional_str, get_parsed, get_required_f64, get_required_str,
    to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::results::{ExamResult, ResultStatus, RevaluationDecision};
use crate::store;
use crate::workflow;
use rusqlite::Connection;
use serde_json::json;

fn result_json(r: &ExamResult) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "result": to_json(r)?,
        "stage": r.stage().as_str()
    }))
}

fn results_enter(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exam_id = get_required_str(params, "examId")?;
    let marks = get_required_f64(params, "marksObtained")?;
    let status: Option<ResultStatus> = get_optional_parsed(params, "status")?;
    result_json(&workflow::enter_result(conn, &student_id, &exam_id, marks, status)?)
}

fn results_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    result_json(&store::load_result(conn, &result_id)?)
}

fn results_process(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    result_json(&workflow::process_result(conn, &result_id)?)
}

fn results_verify(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let evaluator_id = get_required_str(params, "evaluatorId")?;
    result_json(&workflow::verify_result(conn, &result_id, &evaluator_id)?)
}

fn results_publish(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let publisher_id = get_required_str(params, "publisherId")?;
    result_json(&workflow::publish_result(conn, &result_id, &publisher_id)?)
}

fn revaluation_request(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let reason = get_required_str(params, "reason")?;
    result_json(&workflow::request_revaluation(conn, &result_id, &reason)?)
}

fn revaluation_process(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let decision: RevaluationDecision = get_parsed(params, "decision")?;
    result_json(&workflow::decide_revaluation(conn, &result_id, decision)?)
}

fn revaluation_complete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let new_marks = get_required_f64(params, "newMarks")?;
    let remarks = get_optional_str(params, "remarks");
    let evaluator_id = get_required_str(params, "evaluatorId")?;
    result_json(&workflow::complete_revaluation(
        conn,
        &result_id,
        new_marks,
        remarks.as_deref(),
        &evaluator_id,
    )?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "results.enter" => results_enter,
            "results.get" => results_get,
            "results.process" => results_process,
            "results.verify" => results_verify,
            "results.publish" => results_publish,
            "results.revaluation.request" => revaluation_request,
            "results.revaluation.process" => revaluation_process,
            "results.revaluation.complete" => revaluation_complete,
            _ => return None,
        };
    Some(with_db(state, req, |conn, _, params| op(conn, params)))
}
