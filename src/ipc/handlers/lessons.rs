use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn lessons_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let exists = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("group not found"));
    }

    let lesson_date = match params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?
            .to_string(),
        None => chrono::Utc::now().date_naive().to_string(),
    };

    let lesson_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, group_id, lesson_date, ended) VALUES(?, ?, ?, 0)",
        (&lesson_id, &group_id, &lesson_date),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "lessonId": lesson_id, "lessonDate": lesson_date }))
}

fn lessons_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, lesson_date, ended FROM lessons
             WHERE group_id = ? ORDER BY lesson_date, rowid",
        )
        .map_err(HandlerErr::db)?;
    let lessons = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lessonDate": r.get::<_, String>(1)?,
                "ended": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "lessons": lessons }))
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
        "lessons.create" => Some(run(lessons_create, state, req)),
        "lessons.list" => Some(run(lessons_list, state, req)),
        _ => None,
    }
}
