use crate::attendance::{self, AttendanceSummary, CondonationDecision, SummaryKey};
use crate::config::EnginePolicy;
use crate::eligibility::{self, AdmissionDecision, PromotionDecision};
use crate::error::{EngineError, EngineResult};
use crate::events::{self, DomainEvent};
use crate::performance::{self, CumulativePerformance, SemesterPerformance};
use crate::results::{ExamResult, ResultStatus, RevaluationDecision};
use crate::source::RecordSource;
use crate::store::{self, SqliteSource};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction. The write lock is taken
/// up front, so two writers touching the same record are serialized and the
/// second one reads the first one's committed state. Any error rolls back.
pub fn with_immediate_transaction<T, F>(conn: &Connection, f: F) -> EngineResult<T>
where
    F: FnOnce(&Transaction<'_>) -> EngineResult<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub(crate) fn ensure_exists(conn: &Connection, table: &'static str, entity: &'static str, id: &str) -> EngineResult<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    if found.is_none() {
        return Err(EngineError::not_found(entity, id));
    }
    Ok(())
}

fn log_failure<T>(action: &'static str, id: &str, result: EngineResult<T>) -> EngineResult<T> {
    if let Err(e) = &result {
        tracing::warn!(action, id, code = e.code(), error = %e, "operation rejected");
    }
    result
}

// ---------------------------------------------------------------------------
// Attendance

fn recompute_in(
    tx: &Connection,
    policy: &EnginePolicy,
    key: &SummaryKey,
    required_percentage: Option<f64>,
) -> EngineResult<AttendanceSummary> {
    ensure_exists(tx, "students", "student", &key.student_id)?;
    ensure_exists(tx, "courses", "course", &key.course_id)?;
    let source = SqliteSource::new(tx);
    let semester = source.find_semester(&key.semester_id)?;
    let events = source.find_attendance_events(&key.student_id, &key.course_id, &semester.window)?;
    let present = source.find_present_status_ids()?;
    let prior = store::load_summary(tx, key)?;
    let required = required_percentage
        .or_else(|| prior.as_ref().map(|p| p.required_percentage))
        .unwrap_or(policy.required_attendance_percentage);

    let next = attendance::recompute(
        key.clone(),
        &events,
        &semester.window,
        &present,
        required,
        prior.as_ref(),
    )?;
    match prior {
        Some(p) if p == next => Ok(p),
        _ => store::save_summary(tx, &next),
    }
}

/// Rebuilds one summary from its raw events. The requirement falls back to
/// the stored one, then to the policy default. Unchanged totals skip the
/// write.
pub fn recompute_attendance(
    conn: &Connection,
    policy: &EnginePolicy,
    key: &SummaryKey,
    required_percentage: Option<f64>,
) -> EngineResult<AttendanceSummary> {
    let out = with_immediate_transaction(conn, |tx| recompute_in(tx, policy, key, required_percentage));
    log_failure("attendance.recompute", &key.student_id, out)
}

fn load_summary_required(conn: &Connection, key: &SummaryKey) -> EngineResult<AttendanceSummary> {
    store::load_summary(conn, key)?.ok_or_else(|| {
        EngineError::not_found(
            "attendance_summary",
            format!("{}/{}/{}", key.student_id, key.course_id, key.semester_id),
        )
    })
}

pub fn apply_condonation(
    conn: &Connection,
    key: &SummaryKey,
    reason: &str,
    percentage: f64,
) -> EngineResult<AttendanceSummary> {
    let out = with_immediate_transaction(conn, |tx| {
        let summary = load_summary_required(tx, key)?;
        let next = summary.apply_for_condonation(reason, percentage)?;
        let saved = store::save_summary(tx, &next)?;
        events::append(tx, &DomainEvent::CondonationRequested { key: key.clone() })?;
        Ok(saved)
    });
    let out = log_failure("attendance.condonation.apply", &key.student_id, out)?;
    tracing::info!(student = %key.student_id, course = %key.course_id, percentage, "condonation requested");
    Ok(out)
}

/// Records the decision and refreshes the summary from raw events in the
/// same transaction, so eligibility reflects the decision once it commits.
pub fn process_condonation(
    conn: &Connection,
    policy: &EnginePolicy,
    key: &SummaryKey,
    decision: CondonationDecision,
    decided_by: &str,
) -> EngineResult<AttendanceSummary> {
    let out = with_immediate_transaction(conn, |tx| {
        let summary = load_summary_required(tx, key)?;
        let decided = summary.process_condonation(decision, decided_by)?;
        store::save_summary(tx, &decided)?;
        let refreshed = recompute_in(tx, policy, key, None)?;
        events::append(
            tx,
            &DomainEvent::CondonationResolved {
                key: key.clone(),
                status: refreshed.condonation_status,
            },
        )?;
        Ok(refreshed)
    });
    let out = log_failure("attendance.condonation.process", &key.student_id, out)?;
    tracing::info!(
        student = %key.student_id,
        course = %key.course_id,
        status = out.condonation_status.as_str(),
        eligible = out.is_eligible(),
        "condonation decided"
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Exam results

/// Loads the result, applies `f` and writes it back in one immediate
/// transaction. `f` may return an event to record with the write.
fn transition_result<F>(conn: &Connection, action: &'static str, result_id: &str, f: F) -> EngineResult<ExamResult>
where
    F: FnOnce(&Transaction<'_>, &ExamResult) -> EngineResult<(ExamResult, Option<DomainEvent>)>,
{
    let out = with_immediate_transaction(conn, |tx| {
        let prior = store::load_result(tx, result_id)?;
        let (next, event) = f(tx, &prior)?;
        let stored = store::update_result(tx, &prior, &next)?;
        if let Some(event) = event {
            events::append(tx, &event)?;
        }
        Ok(stored)
    });
    let stored = log_failure(action, result_id, out)?;
    tracing::info!(
        action,
        result = %stored.id,
        stage = stored.stage().as_str(),
        status = stored.result_status.as_str(),
        version = stored.version,
        "exam result updated"
    );
    Ok(stored)
}

/// Creates the result for (student, exam), or replaces the marks of an
/// existing one that has not been verified yet.
pub fn enter_result(
    conn: &Connection,
    student_id: &str,
    exam_id: &str,
    marks_obtained: f64,
    status: Option<ResultStatus>,
) -> EngineResult<ExamResult> {
    let out = with_immediate_transaction(conn, |tx| {
        ensure_exists(tx, "students", "student", student_id)?;
        let exam = SqliteSource::new(tx).find_exam(exam_id)?;
        match store::find_result_for(tx, student_id, exam_id)? {
            Some(prior) => {
                let next = prior.reenter(&exam, marks_obtained, status)?;
                store::update_result(tx, &prior, &next)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let raw = ExamResult::enter(id, student_id, &exam, marks_obtained, status)?;
                store::insert_result(tx, &raw)
            }
        }
    });
    let stored = log_failure("results.enter", student_id, out)?;
    tracing::info!(result = %stored.id, student = student_id, exam = exam_id, "marks entered");
    Ok(stored)
}

pub fn process_result(conn: &Connection, result_id: &str) -> EngineResult<ExamResult> {
    transition_result(conn, "results.process", result_id, |tx, prior| {
        let source = SqliteSource::new(tx);
        let exam = source.find_exam(&prior.exam_id)?;
        let scale = source.grade_scale()?;
        let next = prior.process(&exam, &scale)?;
        Ok((
            next,
            Some(DomainEvent::ResultProcessed {
                result_id: result_id.to_string(),
            }),
        ))
    })
}

pub fn verify_result(conn: &Connection, result_id: &str, evaluator_id: &str) -> EngineResult<ExamResult> {
    transition_result(conn, "results.verify", result_id, |_, prior| {
        let next = prior.verify(evaluator_id, Utc::now())?;
        Ok((
            next,
            Some(DomainEvent::ResultVerified {
                result_id: result_id.to_string(),
            }),
        ))
    })
}

/// Publishing the same result twice from two callers yields exactly one
/// success; the other caller sees `AlreadyPublished`.
pub fn publish_result(conn: &Connection, result_id: &str, publisher_id: &str) -> EngineResult<ExamResult> {
    transition_result(conn, "results.publish", result_id, |tx, prior| {
        let next = prior.publish(publisher_id, Utc::now())?;
        let exam = SqliteSource::new(tx).find_exam(&prior.exam_id)?;
        Ok((
            next,
            Some(DomainEvent::ResultPublished {
                result_id: result_id.to_string(),
                student_id: prior.student_id.clone(),
                semester_id: exam.semester_id,
            }),
        ))
    })
}

pub fn request_revaluation(conn: &Connection, result_id: &str, reason: &str) -> EngineResult<ExamResult> {
    transition_result(conn, "results.revaluation.request", result_id, |_, prior| {
        if reason.trim().is_empty() {
            return Err(EngineError::validation("reason", "reason must not be empty"));
        }
        let next = prior.request_revaluation(reason)?;
        Ok((
            next,
            Some(DomainEvent::RevaluationRequested {
                result_id: result_id.to_string(),
            }),
        ))
    })
}

pub fn decide_revaluation(
    conn: &Connection,
    result_id: &str,
    decision: RevaluationDecision,
) -> EngineResult<ExamResult> {
    transition_result(conn, "results.revaluation.decide", result_id, |_, prior| {
        let next = prior.decide_revaluation(decision)?;
        let status = next.revaluation_status;
        Ok((
            next,
            Some(DomainEvent::RevaluationResolved {
                result_id: result_id.to_string(),
                status,
            }),
        ))
    })
}

pub fn complete_revaluation(
    conn: &Connection,
    result_id: &str,
    new_marks: f64,
    remarks: Option<&str>,
    evaluator_id: &str,
) -> EngineResult<ExamResult> {
    transition_result(conn, "results.revaluation.complete", result_id, |tx, prior| {
        let source = SqliteSource::new(tx);
        let exam = source.find_exam(&prior.exam_id)?;
        let scale = source.grade_scale()?;
        let next = prior.complete_revaluation(new_marks, remarks, evaluator_id, &exam, &scale)?;
        let published = next.is_published;
        Ok((
            next,
            Some(DomainEvent::RevaluationCompleted {
                result_id: result_id.to_string(),
                student_id: prior.student_id.clone(),
                semester_id: exam.semester_id,
                published,
            }),
        ))
    })
}

// ---------------------------------------------------------------------------
// Performance and eligibility

pub fn semester_performance(
    conn: &Connection,
    policy: &EnginePolicy,
    student_id: &str,
    semester_id: &str,
) -> EngineResult<SemesterPerformance> {
    ensure_exists(conn, "students", "student", student_id)?;
    let source = SqliteSource::new(conn);
    source.find_semester(semester_id)?;
    let scale = source.grade_scale()?;
    let entries: Vec<_> = source
        .find_published_results(student_id, Some(semester_id))?
        .iter()
        .map(|r| r.graded())
        .collect();
    performance::compute_sgpa(student_id, semester_id, &entries, &scale, policy.sgpa_decimals)
}

pub fn cumulative_performance(
    conn: &Connection,
    policy: &EnginePolicy,
    student_id: &str,
) -> EngineResult<CumulativePerformance> {
    ensure_exists(conn, "students", "student", student_id)?;
    let source = SqliteSource::new(conn);
    let scale = source.grade_scale()?;
    let entries: Vec<_> = source
        .find_published_results(student_id, None)?
        .iter()
        .map(|r| r.graded())
        .collect();
    performance::compute_cgpa(student_id, &entries, &scale, policy.sgpa_decimals)
}

/// Stores the current SGPA for (student, semester) in `semester_performance`.
pub fn refresh_performance_snapshot(
    conn: &Connection,
    policy: &EnginePolicy,
    student_id: &str,
    semester_id: &str,
) -> EngineResult<SemesterPerformance> {
    let perf = semester_performance(conn, policy, student_id, semester_id)?;
    conn.execute(
        "INSERT INTO semester_performance(
            student_id, semester_id, sgpa, total_credits, earned_credits, passed_all, computed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester_id) DO UPDATE SET
            sgpa = excluded.sgpa,
            total_credits = excluded.total_credits,
            earned_credits = excluded.earned_credits,
            passed_all = excluded.passed_all,
            computed_at = excluded.computed_at",
        (
            student_id,
            semester_id,
            perf.sgpa,
            perf.total_credits,
            perf.earned_credits,
            perf.passed_all as i64,
            Utc::now().to_rfc3339(),
        ),
    )?;
    tracing::debug!(student = student_id, semester = semester_id, sgpa = perf.sgpa, "performance snapshot refreshed");
    Ok(perf)
}

/// Promotion check against the student's full published history.
pub fn evaluate_promotion(
    conn: &Connection,
    student_id: &str,
    from_semester: i64,
    to_semester: i64,
    backlog_threshold: usize,
) -> EngineResult<PromotionDecision> {
    let student = store::load_student(conn, student_id)?;
    let history: Vec<_> = SqliteSource::new(conn)
        .find_published_results(student_id, None)?
        .iter()
        .map(|r| r.backlog())
        .collect();
    let decision = eligibility::evaluate_promotion(
        &student.id,
        from_semester,
        to_semester,
        backlog_threshold,
        Some(student.current_semester),
        &history,
    );
    tracing::debug!(
        student = %student.id,
        usn = %student.usn,
        from_semester,
        to_semester,
        eligible = decision.is_eligible(),
        "promotion evaluated"
    );
    Ok(decision)
}

pub fn exam_admission(
    conn: &Connection,
    student_id: &str,
    semester_id: &str,
    course_id: Option<&str>,
) -> EngineResult<Vec<AdmissionDecision>> {
    ensure_exists(conn, "students", "student", student_id)?;
    SqliteSource::new(conn).find_semester(semester_id)?;
    let summaries = store::list_summaries(conn, student_id, semester_id)?;
    Ok(summaries
        .iter()
        .filter(|s| course_id.map(|c| s.key.course_id == c).unwrap_or(true))
        .map(eligibility::exam_admission)
        .collect())
}
