use crate::events;
use crate::ipc::helpers::{get_optional_usize, to_json, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const DEFAULT_LIMIT: usize = 500;

fn handle_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _, params| {
        let limit = get_optional_usize(params, "limit")?.unwrap_or(DEFAULT_LIMIT);
        let rows: Vec<serde_json::Value> = events::pending(conn, limit)?
            .into_iter()
            .map(|(seq, event)| -> Result<serde_json::Value, HandlerErr> {
                Ok(json!({ "seq": seq, "event": to_json(&event)? }))
            })
            .collect::<Result<_, _>>()?;
        Ok(json!({ "events": rows }))
    })
}

fn handle_reconcile(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, policy, params| {
        let limit = get_optional_usize(params, "limit")?.unwrap_or(DEFAULT_LIMIT);
        let report = events::reconcile(conn, policy, limit)?;
        to_json(&report)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.pending" => Some(handle_pending(state, req)),
        "events.reconcile" => Some(handle_reconcile(state, req)),
        _ => None,
    }
}
