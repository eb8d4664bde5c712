use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("records.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Several sidecars may share one workspace; wait for the write lock.
    conn.busy_timeout(Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_bands(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            lower_limit REAL NOT NULL,
            upper_limit REAL NOT NULL,
            grade_points REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            number INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credits REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            weightage REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            exam_type_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            total_marks REAL NOT NULL,
            passing_marks REAL NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(exam_type_id) REFERENCES exam_types(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_semester ON exams(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_status_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            counts_as_present INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            usn TEXT NOT NULL UNIQUE,
            user_id TEXT,
            display_name TEXT NOT NULL,
            current_semester INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_events(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status_id TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(status_id) REFERENCES attendance_status_types(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_events_student_course
         ON attendance_events(student_id, course_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_summaries(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            total_classes INTEGER NOT NULL,
            attended INTEGER NOT NULL,
            condonation_applied INTEGER NOT NULL DEFAULT 0,
            condonation_status TEXT NOT NULL DEFAULT 'not_applicable',
            condonation_percentage REAL NOT NULL DEFAULT 0,
            condonation_reason TEXT,
            condonation_decided_by TEXT,
            required_percentage REAL NOT NULL,
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, course_id, semester_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_summaries_student_semester
         ON attendance_summaries(student_id, semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            out_of_marks REAL NOT NULL,
            percentage REAL,
            grade_code TEXT,
            grade_points REAL,
            result_status TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            is_verified INTEGER NOT NULL DEFAULT 0,
            verified_by TEXT,
            verified_at TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            published_by TEXT,
            published_at TEXT,
            revaluation_requested INTEGER NOT NULL DEFAULT 0,
            revaluation_status TEXT NOT NULL DEFAULT 'not_applicable',
            revaluation_reason TEXT,
            previous_marks REAL,
            revaluation_remarks TEXT,
            revaluated_by TEXT,
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(student_id, exam_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_student ON exam_results(student_id)",
        [],
    )?;
    // Publication is monotonic even for writers that bypass the engine.
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_exam_results_no_unpublish
         BEFORE UPDATE OF is_published ON exam_results
         WHEN OLD.is_published = 1 AND NEW.is_published = 0
         BEGIN
            SELECT RAISE(ABORT, 'cannot unpublish exam result');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            from_semester INTEGER NOT NULL,
            to_semester INTEGER NOT NULL,
            backlog_count INTEGER NOT NULL,
            promoted_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS domain_events(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            processed_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_domain_events_pending ON domain_events(processed_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_performance(
            student_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            sgpa REAL NOT NULL,
            total_credits REAL NOT NULL,
            earned_credits REAL NOT NULL,
            passed_all INTEGER NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY(student_id, semester_id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    // A corrupt value reads as unset so defaults apply.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}
