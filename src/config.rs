use crate::attendance::DEFAULT_REQUIRED_PERCENTAGE;
use crate::db;
use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const POLICY_SETTINGS_KEY: &str = "engine.policy";
pub const LOG_ENV: &str = "RECORDSD_LOG";

/// Institution policy knobs. Stored per workspace; any field missing from
/// the stored JSON falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnginePolicy {
    pub required_attendance_percentage: f64,
    pub backlog_threshold: usize,
    pub sgpa_decimals: u32,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            required_attendance_percentage: DEFAULT_REQUIRED_PERCENTAGE,
            backlog_threshold: 2,
            sgpa_decimals: 2,
        }
    }
}

impl EnginePolicy {
    pub fn validate(&self) -> EngineResult<()> {
        let p = self.required_attendance_percentage;
        if !p.is_finite() || !(0.0..=100.0).contains(&p) {
            return Err(EngineError::PercentageOutOfRange {
                field: "requiredAttendancePercentage",
                value: p,
            });
        }
        if self.sgpa_decimals > 6 {
            return Err(EngineError::validation("sgpaDecimals", "must be at most 6"));
        }
        Ok(())
    }

    pub fn load(conn: &Connection) -> EngineResult<Self> {
        let Some(raw) = db::settings_get_json(conn, POLICY_SETTINGS_KEY)? else {
            return Ok(Self::default());
        };
        match serde_json::from_value::<EnginePolicy>(raw) {
            Ok(policy) if policy.validate().is_ok() => Ok(policy),
            _ => {
                tracing::warn!("stored engine policy is invalid; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, conn: &Connection) -> EngineResult<()> {
        self.validate()?;
        let value = serde_json::to_value(self)
            .map_err(|e| EngineError::validation("policy", e.to_string()))?;
        db::settings_set_json(conn, POLICY_SETTINGS_KEY, &value)?;
        Ok(())
    }
}

/// Logs go to stderr; stdout carries IPC responses.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
