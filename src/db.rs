use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "halaqa.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            lesson_date TEXT NOT NULL,
            ended INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_group ON lessons(group_id, lesson_date)",
        [],
    )?;

    // One row per (lesson, student): the persisted session entry.
    // next_revision holds the parallel-array batch JSON, or NULL.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_students(
            lesson_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attended INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            next_revision TEXT,
            updated_at TEXT,
            PRIMARY KEY(lesson_id, student_id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    // Append-only outcome log; the most recent row per student is the
    // "last revision" basis for the next session.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_history(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            entry_date TEXT NOT NULL,
            attended INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            next_revision TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_student ON student_history(student_id, entry_date)",
        [],
    )?;

    // Cached surah catalog, imported from an AlQuran Cloud surah list.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS surahs(
            number INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            english_name TEXT NOT NULL DEFAULT '',
            english_name_translation TEXT NOT NULL DEFAULT '',
            ayah_count INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}
