use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::catalog::SurahCatalog;
use crate::session::LessonSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Read-only once loaded; `None` means boundary-dependent operations
    /// degrade to "cannot compute".
    pub catalog: Option<SurahCatalog>,
    /// Open lesson sessions, keyed by lesson id. Exclusively owned here
    /// until ended or abandoned.
    pub sessions: HashMap<String, LessonSession>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            catalog: None,
            sessions: HashMap::new(),
        }
    }
}
