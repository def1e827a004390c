use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;

use crate::auth;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub id: String,
    pub created_at: String,
    pub username: String,
    pub prediction: String,
    pub confidence: f32,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResultInput {
    pub prediction: String,
    pub confidence: f32,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    db_path: PathBuf,
}

impl LocalStore {
    pub fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, String> {
        Connection::open(&self.db_path).map_err(|e| e.to_string())
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS users (
              username TEXT PRIMARY KEY,
              password TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS results (
              id TEXT PRIMARY KEY,
              username TEXT NOT NULL,
              prediction TEXT NOT NULL,
              confidence REAL NOT NULL,
              source_file TEXT,
              created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_results_user_created ON results(username, created_at DESC);
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Create an account. Fails if the username is taken.
    pub fn create_user(&self, username: &str, password: &str) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
            params![
                username.trim(),
                auth::hash_password(password),
                Utc::now().timestamp_micros()
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => "Username already exists".to_string(),
            _ => e.to_string(),
        })?;
        Ok(())
    }

    /// `true` when the account exists and the password matches.
    pub fn verify_user(&self, username: &str, password: &str) -> Result<bool, String> {
        let conn = self.open()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT password FROM users WHERE username = ?1",
                params![username.trim()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())?;
        Ok(stored
            .map(|hash| auth::verify_password(password, &hash))
            .unwrap_or(false))
    }

    pub fn insert_result(&self, username: &str, input: ResultInput) -> Result<String, String> {
        let id = new_id("res");
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO results (id, username, prediction, confidence, source_file, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                id,
                username.trim(),
                input.prediction,
                input.confidence as f64,
                input.source_file,
                Utc::now().timestamp_micros()
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(id)
    }

    /// Most recent results first.
    pub fn get_results(&self, username: &str, limit: usize) -> Result<Vec<ResultItem>, String> {
        let limit = limit.clamp(1, 1000);
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at, username, prediction, confidence, source_file
                 FROM results WHERE username = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query(params![username.trim(), limit as i64])
            .map_err(|e| e.to_string())?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let created_at: i64 = row.get(1).map_err(|e| e.to_string())?;
            let created = Utc
                .timestamp_micros(created_at)
                .single()
                .unwrap_or_else(Utc::now)
                .to_rfc3339();
            items.push(ResultItem {
                id: row.get(0).map_err(|e| e.to_string())?,
                created_at: created,
                username: row.get(2).map_err(|e| e.to_string())?,
                prediction: row.get(3).map_err(|e| e.to_string())?,
                confidence: row.get::<_, f64>(4).map_err(|e| e.to_string())? as f32,
                source_file: row.get(5).map_err(|e| e.to_string())?,
            });
        }
        Ok(items)
    }
}

fn new_id(prefix: &str) -> String {
    format!(
        "{prefix}-{}-{:08x}",
        Utc::now().timestamp_micros(),
        rand::random::<u32>()
    )
}
