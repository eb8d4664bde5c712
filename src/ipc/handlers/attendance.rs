use crate::attendance::CondonationDecision;
use crate::ipc::helpers::{
    get_optional_f64, get_parsed, get_required_f64, get_required_str, summary_key, to_json,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use crate::workflow;
use serde_json::json;

fn handle_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let key = summary_key(params)?;
        let required = get_optional_f64(params, "requiredPercentage")?;
        let summary = workflow::recompute_attendance(conn, policy, &key, required)?;
        to_json(&summary.report())
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| {
        let key = summary_key(params)?;
        match store::load_summary(conn, &key)? {
            Some(summary) => to_json(&summary.report()),
            None => Ok(json!(null)),
        }
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| {
        let student_id = get_required_str(params, "studentId")?;
        let semester_id = get_required_str(params, "semesterId")?;
        let reports: Vec<_> = store::list_summaries(conn, &student_id, &semester_id)?
            .iter()
            .map(|s| s.report())
            .collect();
        Ok(json!({ "summaries": to_json(&reports)? }))
    })
}

fn handle_condonation_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| {
        let key = summary_key(params)?;
        let reason = get_required_str(params, "reason")?;
        let percentage = get_required_f64(params, "percentage")?;
        let summary = workflow::apply_condonation(conn, &key, &reason, percentage)?;
        to_json(&summary.report())
    })
}

fn handle_condonation_process(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let key = summary_key(params)?;
        let decision: CondonationDecision = get_parsed(params, "decision")?;
        let decided_by = get_required_str(params, "decidedBy")?;
        let summary = workflow::process_condonation(conn, policy, &key, decision, &decided_by)?;
        to_json(&summary.report())
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.recompute" => Some(handle_recompute(state, req)),
        "attendance.get" => Some(handle_get(state, req)),
        "attendance.list" => Some(handle_list(state, req)),
        "attendance.condonation.apply" => Some(handle_condonation_apply(state, req)),
        "attendance.condonation.process" => Some(handle_condonation_process(state, req)),
        _ => None,
    }
}
