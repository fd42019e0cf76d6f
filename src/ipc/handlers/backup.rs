use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };

    match backup::export_workspace_bundle(workspace, &PathBuf::from(out_path)) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
                "outPath": out_path,
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:#}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = req.params.get("inPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    let Some(workspace_path) = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
    else {
        return err(&req.id, "bad_params", "missing workspacePath", None);
    };

    // The open connection (if any) points at the file being replaced.
    state.db = None;
    state.catalog = None;
    state.sessions.clear();

    match backup::import_workspace_bundle(&PathBuf::from(in_path), &workspace_path) {
        Ok(summary) => {
            let reopened = crate::db::open_db(&workspace_path);
            match reopened {
                Ok(conn) => {
                    state.catalog = crate::catalog::load_catalog(&conn).unwrap_or(None);
                    state.db = Some(conn);
                    state.workspace = Some(workspace_path.clone());
                    ok(
                        &req.id,
                        json!({
                            "bundleFormatDetected": summary.bundle_format_detected,
                            "workspacePath": workspace_path.to_string_lossy(),
                        }),
                    )
                }
                Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
            }
        }
        Err(e) => err(&req.id, "backup_import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        _ => None,
    }
}
