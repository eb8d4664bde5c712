use std::path::PathBuf;

use crate::config::EnginePolicy;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Loaded from the workspace on select; defaults until then.
    pub policy: EnginePolicy,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            policy: EnginePolicy::default(),
        }
    }
}
