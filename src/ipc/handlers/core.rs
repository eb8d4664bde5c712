use crate::config::EnginePolicy;
use crate::db;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{get_parsed, to_json, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            let policy = match EnginePolicy::load(&conn) {
                Ok(p) => p,
                Err(e) => return engine_err(&req.id, &e),
            };
            tracing::info!(workspace = %path.display(), "workspace selected");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.policy = policy;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            tracing::warn!(workspace = %path.display(), error = %e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn handle_policy_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |_, policy, _| to_json(policy))
}

/// Replaces the stored policy. Missing fields take their defaults.
fn handle_policy_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let policy: EnginePolicy = match get_parsed(&req.params, "policy") {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = policy.save(conn) {
        return HandlerErr::from(e).response(&req.id);
    }
    tracing::info!(?policy, "engine policy updated");
    state.policy = policy;
    match to_json(&state.policy) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "policy.get" => Some(handle_policy_get(state, req)),
        "policy.set" => Some(handle_policy_set(state, req)),
        _ => None,
    }
}
