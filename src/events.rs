use crate::attendance::{CondonationStatus, SummaryKey};
use crate::config::EnginePolicy;
use crate::error::{EngineError, EngineResult};
use crate::results::RevaluationStatus;
use crate::workflow;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Facts recorded alongside each committed transition. Consumers read them
/// from the outbox instead of watching tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    CondonationRequested { key: SummaryKey },
    #[serde(rename_all = "camelCase")]
    CondonationResolved {
        key: SummaryKey,
        status: CondonationStatus,
    },
    #[serde(rename_all = "camelCase")]
    ResultProcessed { result_id: String },
    #[serde(rename_all = "camelCase")]
    ResultVerified { result_id: String },
    #[serde(rename_all = "camelCase")]
    ResultPublished {
        result_id: String,
        student_id: String,
        semester_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RevaluationRequested { result_id: String },
    #[serde(rename_all = "camelCase")]
    RevaluationResolved {
        result_id: String,
        status: RevaluationStatus,
    },
    #[serde(rename_all = "camelCase")]
    RevaluationCompleted {
        result_id: String,
        student_id: String,
        semester_id: String,
        published: bool,
    },
    #[serde(rename_all = "camelCase")]
    StudentPromoted {
        student_id: String,
        from_semester: i64,
        to_semester: i64,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::CondonationRequested { .. } => "condonation_requested",
            DomainEvent::CondonationResolved { .. } => "condonation_resolved",
            DomainEvent::ResultProcessed { .. } => "result_processed",
            DomainEvent::ResultVerified { .. } => "result_verified",
            DomainEvent::ResultPublished { .. } => "result_published",
            DomainEvent::RevaluationRequested { .. } => "revaluation_requested",
            DomainEvent::RevaluationResolved { .. } => "revaluation_resolved",
            DomainEvent::RevaluationCompleted { .. } => "revaluation_completed",
            DomainEvent::StudentPromoted { .. } => "student_promoted",
        }
    }
}

pub fn append(conn: &Connection, event: &DomainEvent) -> EngineResult<i64> {
    let payload = serde_json::to_string(event)
        .map_err(|e| EngineError::validation("event", e.to_string()))?;
    conn.execute(
        "INSERT INTO domain_events(kind, payload_json, created_at) VALUES(?, ?, ?)",
        (event.kind(), payload, Utc::now().to_rfc3339()),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Unprocessed events, oldest first. Events that already failed are queued
/// behind those never attempted.
pub fn pending(conn: &Connection, limit: usize) -> EngineResult<Vec<(i64, DomainEvent)>> {
    let mut stmt = conn.prepare(
        "SELECT seq, payload_json FROM domain_events
         WHERE processed_at IS NULL
         ORDER BY attempts, seq
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(seq, payload)| {
            serde_json::from_str::<DomainEvent>(&payload)
                .map(|e| (seq, e))
                .map_err(|e| EngineError::validation("event", format!("seq {seq}: {e}")))
        })
        .collect()
}

fn mark_processed(conn: &Connection, seq: i64) -> EngineResult<()> {
    conn.execute(
        "UPDATE domain_events SET processed_at = ? WHERE seq = ?",
        (Utc::now().to_rfc3339(), seq),
    )?;
    Ok(())
}

fn mark_failed(conn: &Connection, seq: i64, error: &EngineError) -> EngineResult<i64> {
    conn.execute(
        "UPDATE domain_events SET attempts = attempts + 1, last_error = ? WHERE seq = ?",
        (error.to_string(), seq),
    )?;
    let attempts = conn.query_row(
        "SELECT attempts FROM domain_events WHERE seq = ?",
        [seq],
        |r| r.get(0),
    )?;
    Ok(attempts)
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub processed: usize,
    pub recomputed_summaries: usize,
    pub refreshed_performance: usize,
    pub failures: Vec<ReconcileFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub seq: i64,
    pub kind: String,
    pub code: String,
    pub message: String,
    pub attempts: i64,
}

/// Drains up to `limit` pending events. A failing event stays pending, has
/// its attempt counted and is reported; the rest still run.
pub fn reconcile(conn: &Connection, policy: &EnginePolicy, limit: usize) -> EngineResult<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for (seq, event) in pending(conn, limit)? {
        let outcome = match &event {
            DomainEvent::CondonationResolved { key, .. } => {
                workflow::recompute_attendance(conn, policy, key, None).map(|_| {
                    report.recomputed_summaries += 1;
                })
            }
            DomainEvent::ResultPublished {
                student_id,
                semester_id,
                ..
            }
            | DomainEvent::RevaluationCompleted {
                student_id,
                semester_id,
                published: true,
                ..
            } => workflow::refresh_performance_snapshot(conn, policy, student_id, semester_id)
                .map(|_| {
                    report.refreshed_performance += 1;
                }),
            _ => Ok(()),
        };
        match outcome.and_then(|_| mark_processed(conn, seq)) {
            Ok(()) => report.processed += 1,
            Err(e) => {
                let attempts = mark_failed(conn, seq, &e)?;
                tracing::warn!(seq, attempts, kind = event.kind(), error = %e, "event reconciliation failed");
                report.failures.push(ReconcileFailure {
                    seq,
                    kind: event.kind().to_string(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                    attempts,
                });
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn open(prefix: &str) -> Connection {
        let ws = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        db::open_db(&ws).expect("open db")
    }

    fn orphan_condonation(student_id: &str) -> DomainEvent {
        DomainEvent::CondonationResolved {
            key: SummaryKey {
                student_id: student_id.into(),
                course_id: "c1".into(),
                semester_id: "sem1".into(),
            },
            status: CondonationStatus::Approved,
        }
    }

    #[test]
    fn failing_events_do_not_block_later_ones() {
        let conn = open("recordsd-events-stuck");
        append(&conn, &orphan_condonation("ghost1")).expect("append");
        append(&conn, &orphan_condonation("ghost2")).expect("append");
        let verified = append(
            &conn,
            &DomainEvent::ResultVerified {
                result_id: "r1".into(),
            },
        )
        .expect("append");

        let policy = EnginePolicy::default();
        let first = reconcile(&conn, &policy, 2).expect("reconcile");
        assert_eq!(first.processed, 0);
        assert_eq!(first.failures.len(), 2);
        assert!(first.failures.iter().all(|f| f.attempts == 1));

        let second = reconcile(&conn, &policy, 2).expect("reconcile");
        assert_eq!(second.processed, 1);
        assert_eq!(second.failures.len(), 1);
        assert_eq!(second.failures[0].attempts, 2);

        let left = pending(&conn, 10).expect("pending");
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|(seq, _)| *seq != verified));
        let last_error: Option<String> = conn
            .query_row(
                "SELECT last_error FROM domain_events WHERE seq = ?",
                [left[0].0],
                |r| r.get(0),
            )
            .expect("row");
        assert!(last_error.is_some());
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let e = DomainEvent::ResultPublished {
            result_id: "r1".into(),
            student_id: "s1".into(),
            semester_id: "sem1".into(),
        };
        let v = serde_json::to_value(&e).expect("json");
        assert_eq!(v["kind"], "result_published");
        assert_eq!(v["resultId"], "r1");
        let back: DomainEvent = serde_json::from_value(v).expect("parse");
        assert_eq!(back, e);
        assert_eq!(back.kind(), "result_published");
    }
}
