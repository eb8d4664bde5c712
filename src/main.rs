mod attendance;
mod batch;
mod config;
mod db;
mod eligibility;
mod error;
mod events;
mod grade_scale;
mod ipc;
mod performance;
mod results;
mod source;
mod store;
mod workflow;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn write_line(out: &mut impl Write, value: &serde_json::Value) -> io::Result<()> {
    writeln!(out, "{}", value)?;
    out.flush()
}

fn main() -> anyhow::Result<()> {
    config::init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "recordsd starting");

    let mut state = ipc::AppState::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                write_line(
                    &mut stdout,
                    &json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                )?;
                continue;
            }
        };

        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        tracing::debug!(%method, ok = resp.get("ok").and_then(|v| v.as_bool()), "request handled");
        write_line(&mut stdout, &resp)?;
    }

    tracing::info!("recordsd exiting");
    Ok(())
}
