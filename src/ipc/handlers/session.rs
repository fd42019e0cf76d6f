use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_index, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{LessonSession, RangeField, SessionEntry};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn session_view(session: &LessonSession) -> serde_json::Value {
    serde_json::to_value(session).unwrap_or(serde_json::Value::Null)
}

fn entry_view(entry: &SessionEntry) -> serde_json::Value {
    serde_json::to_value(entry).unwrap_or(serde_json::Value::Null)
}

fn load_stored_entries(
    conn: &Connection,
    lesson_id: &str,
) -> Result<HashMap<String, serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, attended, notes, next_revision
             FROM lesson_students WHERE lesson_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([lesson_id], |r| {
            let student_id: String = r.get(0)?;
            let attended: i64 = r.get(1)?;
            let notes: String = r.get(2)?;
            let next_revision: Option<String> = r.get(3)?;
            Ok((student_id, attended, notes, next_revision))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = HashMap::new();
    for (student_id, attended, notes, next_revision) in rows {
        let next_revision = next_revision
            .and_then(|t| serde_json::from_str::<serde_json::Value>(&t).ok())
            .unwrap_or(serde_json::Value::Null);
        out.insert(
            student_id,
            json!({
                "attended": attended != 0,
                "notes": notes,
                "nextRevision": next_revision,
            }),
        );
    }
    Ok(out)
}

fn load_history_last(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT notes, next_revision FROM student_history
             WHERE student_id = ?
             ORDER BY entry_date DESC, rowid DESC
             LIMIT 1",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    Ok(row.map(|(notes, next_revision)| {
        let next_revision = next_revision
            .and_then(|t| serde_json::from_str::<serde_json::Value>(&t).ok())
            .unwrap_or(serde_json::Value::Null);
        json!({ "notes": notes, "nextRevision": next_revision })
    }))
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };

    // Re-opening an already open session returns it untouched, so a client
    // retry never discards in-progress edits.
    if let Some(session) = state.sessions.get(&lesson_id) {
        return ok(
            &req.id,
            json!({ "session": session_view(session), "resumed": true }),
        );
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lesson: Option<(String, String, i64)> = match conn
        .query_row(
            "SELECT group_id, lesson_date, ended FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((group_id, lesson_date, ended)) = lesson else {
        return err(&req.id, "not_found", "lesson not found", None);
    };
    if ended != 0 {
        return err(&req.id, "lesson_ended", "lesson is already ended", None);
    }

    let roster = conn
        .prepare("SELECT id, name FROM students WHERE group_id = ? ORDER BY sort_order")
        .and_then(|mut stmt| {
            stmt.query_map([&group_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    let roster = match roster {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let stored = match load_stored_entries(conn, &lesson_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let catalog = state.catalog.as_ref();
    let empty = json!({});
    let mut entries = Vec::with_capacity(roster.len());
    for (student_id, name) in &roster {
        let history_last = match load_history_last(conn, student_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let stored_entry = stored.get(student_id).unwrap_or(&empty);
        entries.push(SessionEntry::from_stored(
            student_id,
            name,
            stored_entry,
            history_last.as_ref(),
            catalog,
        ));
    }

    let session = LessonSession {
        lesson_id: lesson_id.clone(),
        group_id,
        lesson_date,
        entries,
    };
    let view = session_view(&session);
    state.sessions.insert(lesson_id, session);
    ok(&req.id, json!({ "session": view, "resumed": false }))
}

fn handle_session_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    match state.sessions.get(lesson_id) {
        Some(session) => ok(&req.id, json!({ "session": session_view(session) })),
        None => err(&req.id, "no_session", "no open session for lesson", None),
    }
}

/// Run one edit operation against one student's entry, answering with the
/// refreshed entry view.
fn with_entry(
    state: &mut AppState,
    req: &Request,
    op: impl FnOnce(&mut SessionEntry, Option<&crate::catalog::SurahCatalog>) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let (lesson_id, student_id) = match (
        get_required_str(&req.params, "lessonId"),
        get_required_str(&req.params, "studentId"),
    ) {
        (Ok(l), Ok(s)) => (l, s),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };
    let catalog = state.catalog.as_ref();
    let Some(session) = state.sessions.get_mut(&lesson_id) else {
        return err(&req.id, "no_session", "no open session for lesson", None);
    };
    let Some(entry) = session.entry_mut(&student_id) else {
        return err(&req.id, "not_found", "student not in session", None);
    };
    match op(entry, catalog) {
        Ok(mut result) => {
            result["studentEntry"] = entry_view(entry);
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_edit_notes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let notes = match get_required_str(&req.params, "notes") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    with_entry(state, req, move |entry, _| {
        entry.edit_notes(&notes);
        Ok(json!({}))
    })
}

fn handle_add_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_entry(state, req, |entry, _| {
        entry.add_range();
        Ok(json!({ "rangeCount": entry.next_revision.len() }))
    })
}

fn handle_remove_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let index = match get_required_index(&req.params, "index") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    with_entry(state, req, move |entry, _| {
        entry.remove_range(index);
        Ok(json!({ "rangeCount": entry.next_revision.len() }))
    })
}

fn handle_edit_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let index = match get_required_index(&req.params, "index") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let field_name = match get_required_str(&req.params, "field") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(field) = RangeField::parse(&field_name) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown field: {}", field_name),
            None,
        );
    };
    let value = req
        .params
        .get("value")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    with_entry(state, req, move |entry, catalog| {
        if !entry.edit_range(index, field, &value, catalog) {
            return Err(HandlerErr::not_found("range index out of range"));
        }
        Ok(json!({}))
    })
}

fn handle_suggest_next(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_entry(state, req, |entry, catalog| {
        let applied = entry.suggest_next(catalog);
        Ok(json!({ "applied": applied }))
    })
}

fn persist_entry(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
    payload: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let attended = payload
        .get("attended")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let notes = payload.get("notes").and_then(|v| v.as_str()).unwrap_or("");
    let next_revision = match payload.get("nextRevision") {
        Some(serde_json::Value::Null) | None => None,
        Some(v) => Some(v.to_string()),
    };
    conn.execute(
        "INSERT INTO lesson_students(lesson_id, student_id, attended, notes, next_revision, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(lesson_id, student_id) DO UPDATE SET
           attended = excluded.attended,
           notes = excluded.notes,
           next_revision = excluded.next_revision,
           updated_at = excluded.updated_at",
        (
            lesson_id,
            student_id,
            attended as i64,
            notes,
            &next_revision,
            db::now_utc(),
        ),
    )
    .map_err(HandlerErr::db)?;
    Ok(())
}

fn handle_save_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (lesson_id, student_id) = match (
        get_required_str(&req.params, "lessonId"),
        get_required_str(&req.params, "studentId"),
    ) {
        (Ok(l), Ok(s)) => (l, s),
        (Err(e), _) | (_, Err(e)) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.sessions.get_mut(&lesson_id) else {
        return err(&req.id, "no_session", "no open session for lesson", None);
    };
    let Some(entry) = session.entry_mut(&student_id) else {
        return err(&req.id, "not_found", "student not in session", None);
    };

    let payload = entry.save_payload();
    // Persist first; the in-memory entry is only touched once the store
    // accepted the payload, so a failed save can simply be retried.
    if let Err(e) = persist_entry(conn, &lesson_id, &student_id, &payload) {
        return e.response(&req.id);
    }
    entry.apply_saved(&payload);

    ok(
        &req.id,
        json!({ "saved": true, "studentEntry": entry_view(entry) }),
    )
}

fn handle_session_end(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.sessions.get(&lesson_id) else {
        return err(&req.id, "no_session", "no open session for lesson", None);
    };

    let payloads = session.finalize_payloads();
    let entry_date = session.lesson_date.clone();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for payload in &payloads {
        let student_id = payload
            .get("studentId")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if let Err(e) = persist_entry(&tx, &lesson_id, student_id, payload) {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
        let attended = payload
            .get("attended")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let notes = payload.get("notes").and_then(|v| v.as_str()).unwrap_or("");
        let next_revision = match payload.get("nextRevision") {
            Some(serde_json::Value::Null) | None => None,
            Some(v) => Some(v.to_string()),
        };
        if let Err(e) = tx.execute(
            "INSERT INTO student_history(id, student_id, entry_date, attended, notes, next_revision)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &entry_date,
                attended as i64,
                notes,
                &next_revision,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "student_history" })),
            );
        }
    }
    if let Err(e) = tx.execute("UPDATE lessons SET ended = 1 WHERE id = ?", [&lesson_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        // The session stays open; ending can be retried.
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    state.sessions.remove(&lesson_id);
    ok(&req.id, json!({ "ended": true, "attendance": payloads }))
}

fn handle_session_abandon(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    let discarded = state.sessions.remove(lesson_id).is_some();
    ok(&req.id, json!({ "discarded": discarded }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_session_open(state, req)),
        "session.get" => Some(handle_session_get(state, req)),
        "session.editNotes" => Some(handle_edit_notes(state, req)),
        "session.addRange" => Some(handle_add_range(state, req)),
        "session.removeRange" => Some(handle_remove_range(state, req)),
        "session.editRange" => Some(handle_edit_range(state, req)),
        "session.suggestNext" => Some(handle_suggest_next(state, req)),
        "session.saveStudent" => Some(handle_save_student(state, req)),
        "session.end" => Some(handle_session_end(state, req)),
        "session.abandon" => Some(handle_session_abandon(state, req)),
        _ => None,
    }
}
