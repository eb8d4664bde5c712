use crate::eligibility::PromotionDecision;
use crate::error::{EngineError, EngineResult};
use crate::events::{self, DomainEvent};
use crate::workflow::{self, with_immediate_transaction};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for ItemError {
    fn from(e: &EngineError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem<T> {
    pub index: usize,
    pub key: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// Per-item outcomes of a batch. Items that failed validation or evaluation
/// are listed and skipped; the writes for the rest commit together or not at
/// all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport<T> {
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItem<T>>,
}

impl<T> BatchReport<T> {
    fn from_items(items: Vec<BatchItem<T>>) -> Self {
        let succeeded = items.iter().filter(|i| i.ok).count();
        Self {
            succeeded,
            failed: items.len() - succeeded,
            items,
        }
    }
}

fn ok_item<T>(index: usize, key: &str, outcome: T) -> BatchItem<T> {
    BatchItem {
        index,
        key: key.to_string(),
        ok: true,
        outcome: Some(outcome),
        error: None,
    }
}

fn failed_item<T>(index: usize, key: &str, error: ItemError) -> BatchItem<T> {
    BatchItem {
        index,
        key: key.to_string(),
        ok: false,
        outcome: None,
        error: Some(error),
    }
}

// ---------------------------------------------------------------------------
// Promotion

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    pub promotion_id: String,
    pub backlog_count: usize,
}

/// Promotes every eligible student from `from_semester` to `to_semester`.
/// Ineligible or unknown students are reported as failed items. A storage
/// error on any write rolls the whole batch back.
pub fn promote_students(
    conn: &Connection,
    student_ids: &[String],
    from_semester: i64,
    to_semester: i64,
    backlog_threshold: usize,
) -> EngineResult<BatchReport<PromotionOutcome>> {
    let out = with_immediate_transaction(conn, |tx| {
        let mut items = Vec::with_capacity(student_ids.len());
        let mut seen = HashSet::new();
        for (index, student_id) in student_ids.iter().enumerate() {
            if !seen.insert(student_id.as_str()) {
                items.push(failed_item(
                    index,
                    student_id,
                    ItemError {
                        code: "duplicate".into(),
                        message: format!("student {student_id} appears more than once"),
                    },
                ));
                continue;
            }
            let decision = match workflow::evaluate_promotion(
                tx,
                student_id,
                from_semester,
                to_semester,
                backlog_threshold,
            ) {
                Ok(d) => d,
                Err(e @ EngineError::Storage(_)) => return Err(e),
                Err(e) => {
                    items.push(failed_item(index, student_id, ItemError::from(&e)));
                    continue;
                }
            };
            match decision {
                PromotionDecision::Eligible { backlog_count } => {
                    let promotion_id = promote_one(
                        tx,
                        student_id,
                        from_semester,
                        to_semester,
                        backlog_count,
                    )?;
                    items.push(ok_item(
                        index,
                        student_id,
                        PromotionOutcome {
                            promotion_id,
                            backlog_count,
                        },
                    ));
                }
                PromotionDecision::Ineligible { reason, .. } => {
                    items.push(failed_item(
                        index,
                        student_id,
                        ItemError {
                            code: "ineligible".into(),
                            message: reason,
                        },
                    ));
                }
            }
        }
        Ok(BatchReport::from_items(items))
    });
    match &out {
        Ok(report) => tracing::info!(
            from_semester,
            to_semester,
            promoted = report.succeeded,
            skipped = report.failed,
            "batch promotion committed"
        ),
        Err(e) => tracing::warn!(from_semester, to_semester, error = %e, "batch promotion rolled back"),
    }
    out
}

fn promote_one(
    tx: &Connection,
    student_id: &str,
    from_semester: i64,
    to_semester: i64,
    backlog_count: usize,
) -> EngineResult<String> {
    let now = Utc::now().to_rfc3339();
    let changed = tx.execute(
        "UPDATE students SET current_semester = ?, updated_at = ?
         WHERE id = ? AND current_semester = ?",
        (to_semester, &now, student_id, from_semester),
    )?;
    if changed == 0 {
        return Err(EngineError::VersionConflict {
            entity: "student",
            id: student_id.to_string(),
            expected: from_semester,
        });
    }
    let promotion_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO promotions(id, student_id, from_semester, to_semester, backlog_count, promoted_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &promotion_id,
            student_id,
            from_semester,
            to_semester,
            backlog_count as i64,
            &now,
        ),
    )?;
    events::append(
        tx,
        &DomainEvent::StudentPromoted {
            student_id: student_id.to_string(),
            from_semester,
            to_semester,
        },
    )?;
    Ok(promotion_id)
}

// ---------------------------------------------------------------------------
// Student import

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentImportRow {
    pub usn: String,
    pub display_name: String,
    pub email: String,
    #[serde(default = "first_semester")]
    pub current_semester: i64,
}

fn first_semester() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub student_id: String,
    pub user_id: String,
}

fn validate_row(row: &StudentImportRow) -> Result<(), ItemError> {
    let bad = |message: &str| ItemError {
        code: "bad_params".into(),
        message: message.to_string(),
    };
    if row.usn.trim().is_empty() {
        return Err(bad("usn must not be empty"));
    }
    if row.display_name.trim().is_empty() {
        return Err(bad("displayName must not be empty"));
    }
    let email = row.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(bad("email is not a valid address")),
    }
    if row.current_semester < 1 {
        return Err(bad("currentSemester must be at least 1"));
    }
    Ok(())
}

fn taken(tx: &Connection, sql: &str, value: &str) -> EngineResult<bool> {
    let hit: Option<i64> = tx.query_row(sql, [value], |r| r.get(0)).optional()?;
    Ok(hit.is_some())
}

/// Creates a user and a student for every valid row. Rows that are
/// malformed or collide on USN or email, within the batch or with stored
/// records, are reported and skipped.
pub fn import_students(
    conn: &Connection,
    rows: &[StudentImportRow],
) -> EngineResult<BatchReport<ImportOutcome>> {
    let out = with_immediate_transaction(conn, |tx| {
        let mut items = Vec::with_capacity(rows.len());
        let mut usns = HashSet::new();
        let mut emails = HashSet::new();
        let now = Utc::now().to_rfc3339();
        for (index, row) in rows.iter().enumerate() {
            let usn = row.usn.trim().to_uppercase();
            let email = row.email.trim().to_lowercase();
            if let Err(e) = validate_row(row) {
                items.push(failed_item(index, &usn, e));
                continue;
            }
            let duplicate = if !usns.insert(usn.clone())
                || taken(tx, "SELECT 1 FROM students WHERE usn = ?", &usn)?
            {
                Some(format!("usn {usn} already exists"))
            } else if !emails.insert(email.clone())
                || taken(tx, "SELECT 1 FROM users WHERE email = ?", &email)?
            {
                Some(format!("email {email} already exists"))
            } else {
                None
            };
            if let Some(message) = duplicate {
                items.push(failed_item(
                    index,
                    &usn,
                    ItemError {
                        code: "duplicate".into(),
                        message,
                    },
                ));
                continue;
            }

            let user_id = uuid::Uuid::new_v4().to_string();
            let student_id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO users(id, email, display_name, role) VALUES(?, ?, ?, 'student')",
                (&user_id, &email, row.display_name.trim()),
            )?;
            tx.execute(
                "INSERT INTO students(id, usn, user_id, display_name, current_semester, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &student_id,
                    &usn,
                    &user_id,
                    row.display_name.trim(),
                    row.current_semester,
                    &now,
                ),
            )?;
            items.push(ok_item(
                index,
                &usn,
                ImportOutcome {
                    student_id,
                    user_id,
                },
            ));
        }
        Ok(BatchReport::from_items(items))
    });
    match &out {
        Ok(report) => tracing::info!(
            imported = report.succeeded,
            skipped = report.failed,
            "student import committed"
        ),
        Err(e) => tracing::warn!(error = %e, "student import rolled back"),
    }
    out
}
