use std::path::PathBuf;

use serde::Deserialize;

use crate::ledger::Ledger;
use crate::model::User;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub ledger: Option<Ledger>,
    /// Signed-in user; cleared by `auth.logout` and workspace changes.
    pub session: Option<User>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            ledger: None,
            session: None,
        }
    }
}
