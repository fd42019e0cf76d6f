use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let name = get_required_str(params, "name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("group not found"));
    }

    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, group_id, name, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, &group_id, &name, next_order, db::now_utc()),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "studentId": student_id, "name": name }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, sort_order FROM students WHERE group_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let students = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": students }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let name = params
        .get("patch")
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("patch.name required"))?;

    let changed = conn
        .execute(
            "UPDATE students SET name = ? WHERE id = ?",
            (name, &student_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "updated": true }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    tx.execute(
        "DELETE FROM student_history WHERE student_id = ?",
        [&student_id],
    )
    .map_err(HandlerErr::db)?;
    tx.execute(
        "DELETE FROM lesson_students WHERE student_id = ?",
        [&student_id],
    )
    .map_err(HandlerErr::db)?;
    let removed = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(HandlerErr::db)?;
    tx.commit().map_err(HandlerErr::db)?;
    if removed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "deleted": true }))
}

/// The append-only outcome log, most recent last. `nextRevision` is echoed
/// as the stored batch JSON; callers normalize it.
fn students_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT entry_date, attended, notes, next_revision
             FROM student_history
             WHERE student_id = ?
             ORDER BY entry_date, rowid",
        )
        .map_err(HandlerErr::db)?;
    let entries = stmt
        .query_map([&student_id], |r| {
            let entry_date: String = r.get(0)?;
            let attended: i64 = r.get(1)?;
            let notes: String = r.get(2)?;
            let next_revision: Option<String> = r.get(3)?;
            Ok((entry_date, attended, notes, next_revision))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let entries: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(entry_date, attended, notes, next_revision)| {
            let next_revision = next_revision
                .and_then(|t| serde_json::from_str::<serde_json::Value>(&t).ok())
                .unwrap_or(serde_json::Value::Null);
            json!({
                "date": entry_date,
                "attended": attended != 0,
                "notes": notes,
                "nextRevision": next_revision,
            })
        })
        .collect();

    Ok(json!({ "history": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &mut AppState,
               req: &Request| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }
    };

    match req.method.as_str() {
        "students.create" => Some(run(students_create, state, req)),
        "students.list" => Some(run(students_list, state, req)),
        "students.update" => Some(run(students_update, state, req)),
        "students.delete" => Some(run(students_delete, state, req)),
        "students.history" => Some(run(students_history, state, req)),
        _ => None,
    }
}
