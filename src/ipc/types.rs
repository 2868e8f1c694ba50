use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::Deserialize;

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
    /// Pinned service date; `None` follows the local clock.
    pub today_override: Option<NaiveDate>,
}

impl AppState {
    pub fn new(today_override: Option<NaiveDate>) -> Self {
        Self {
            workspace: None,
            db: None,
            today_override,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today_override
            .unwrap_or_else(|| Local::now().date_naive())
    }
}
