use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           g.id,
           g.title,
           (SELECT COUNT(*) FROM students s WHERE s.group_id = g.id) AS student_count,
           (SELECT COUNT(*) FROM lessons l WHERE l.group_id = g.id) AS lesson_count
         FROM groups g
         ORDER BY g.title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            let lesson_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "title": title,
                "studentCount": student_count,
                "lessonCount": lesson_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, title, created_at) VALUES(?, ?, ?)",
        (&group_id, &title, db::now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    ok(&req.id, json!({ "groupId": group_id, "title": title }))
}

fn handle_groups_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let title: Option<String> = match conn
        .query_row("SELECT title FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(title) = title else {
        return err(&req.id, "not_found", "group not found", None);
    };

    let students = conn
        .prepare(
            "SELECT id, name FROM students WHERE group_id = ? ORDER BY sort_order",
        )
        .and_then(|mut stmt| {
            stmt.query_map([&group_id], |r| {
                Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    let students = match students {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let lessons = conn
        .prepare(
            "SELECT id, lesson_date, ended FROM lessons WHERE group_id = ? ORDER BY lesson_date, rowid",
        )
        .and_then(|mut stmt| {
            stmt.query_map([&group_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "lessonDate": r.get::<_, String>(1)?,
                    "ended": r.get::<_, i64>(2)? != 0,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    let lessons = match lessons {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "group": {
                "id": group_id,
                "title": title,
                "students": students,
                "lessons": lessons,
            }
        }),
    )
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 5] = [
        (
            "student_history",
            "DELETE FROM student_history
             WHERE student_id IN (SELECT id FROM students WHERE group_id = ?)",
        ),
        (
            "lesson_students",
            "DELETE FROM lesson_students
             WHERE lesson_id IN (SELECT id FROM lessons WHERE group_id = ?)",
        ),
        ("lessons", "DELETE FROM lessons WHERE group_id = ?"),
        ("students", "DELETE FROM students WHERE group_id = ?"),
        ("groups", "DELETE FROM groups WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&group_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Any open session for this group's lessons is now orphaned.
    state.sessions.retain(|_, s| s.group_id != group_id);

    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.get" => Some(handle_groups_get(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        _ => None,
    }
}
