use crate::catalog::{self, SurahCatalog};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_catalog_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let surahs = match catalog::parse_surah_list_file(&PathBuf::from(path)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "catalog_parse_failed", format!("{e:#}"), None),
    };
    if let Err(e) = catalog::store_catalog(conn, &surahs) {
        return err(&req.id, "db_update_failed", format!("{e:#}"), None);
    }

    let count = surahs.len();
    state.catalog = Some(SurahCatalog::new(surahs));
    ok(&req.id, json!({ "surahCount": count }))
}

fn handle_catalog_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let surahs: Vec<serde_json::Value> = state
        .catalog
        .as_ref()
        .map(|c| {
            c.iter()
                .map(|s| serde_json::to_value(s).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    ok(
        &req.id,
        json!({
            "loaded": state.catalog.is_some(),
            "surahs": surahs,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.import" => Some(handle_catalog_import(state, req)),
        "catalog.list" => Some(handle_catalog_list(state, req)),
        _ => None,
    }
}
