//! Session Context Store
//!
//! Keeps the structured context (who the visitor is, their company, what
//! they care about) per chat session. SQLite when a database path is
//! usable, otherwise an in-memory map for the life of the process.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Structured context sent alongside chat messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
    /// Anything else the client sends
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionContext {
    /// Overlay `newer` on top of self
    pub fn merge(&mut self, newer: &SessionContext) {
        fn overlay(slot: &mut Option<String>, newer: &Option<String>) {
            if newer.is_some() {
                slot.clone_from(newer);
            }
        }

        overlay(&mut self.session_id, &newer.session_id);
        overlay(&mut self.name, &newer.name);
        overlay(&mut self.email, &newer.email);
        overlay(&mut self.company, &newer.company);
        overlay(&mut self.role, &newer.role);
        overlay(&mut self.industry, &newer.industry);

        for interest in &newer.interests {
            if !self.interests.contains(interest) {
                self.interests.push(interest.clone());
            }
        }
        for (k, v) in &newer.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

enum Backend {
    Sqlite(Mutex<Connection>),
    Memory(RwLock<HashMap<String, SessionContext>>),
}

/// Context store with SQLite backend and in-memory fallback
pub struct ContextStore {
    backend: Backend,
}

impl ContextStore {
    /// Open or create context database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        info!("Context store opened: {}", path.display());
        Ok(Self {
            backend: Backend::Sqlite(Mutex::new(conn)),
        })
    }

    /// Open the database, falling back to memory if that fails
    pub fn open_or_memory(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "Context store unavailable at {} ({}), using in-memory fallback",
                    path.display(),
                    e
                );
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Sqlite(_))
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_context (
                session_id TEXT PRIMARY KEY,
                context TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace the context for a session
    pub fn save(&self, session_id: &str, context: &SessionContext) -> Result<()> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let json = serde_json::to_string(context)?;
                conn.lock().execute(
                    "INSERT INTO conversation_context (session_id, context, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(session_id) DO UPDATE SET
                        context = excluded.context,
                        updated_at = excluded.updated_at",
                    params![session_id, json, chrono::Utc::now().timestamp_millis()],
                )?;
            }
            Backend::Memory(map) => {
                map.write().insert(session_id.to_string(), context.clone());
            }
        }

        debug!("Saved context for session {}", session_id);
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionContext>> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let json: Option<String> = conn
                    .lock()
                    .query_row(
                        "SELECT context FROM conversation_context WHERE session_id = ?1",
                        params![session_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match json {
                    Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                    None => Ok(None),
                }
            }
            Backend::Memory(map) => Ok(map.read().get(session_id).cloned()),
        }
    }

    /// Delete a session's context; true if something was removed
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let rows = conn.lock().execute(
                    "DELETE FROM conversation_context WHERE session_id = ?1",
                    params![session_id],
                )?;
                Ok(rows > 0)
            }
            Backend::Memory(map) => Ok(map.write().remove(session_id).is_some()),
        }
    }

    pub fn count(&self) -> Result<usize> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let n: i64 = conn
                    .lock()
                    .query_row("SELECT COUNT(*) FROM conversation_context", [], |row| row.get(0))?;
                Ok(n as usize)
            }
            Backend::Memory(map) => Ok(map.read().len()),
        }
    }
}
