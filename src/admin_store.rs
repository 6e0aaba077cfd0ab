//! Admin Conversation Store
//!
//! Raw turn history of admin chat sessions, with optional embeddings per
//! turn. Rolling window per session; SQLite or in-memory.

use crate::embeddings::{embedding_from_bytes, embedding_to_bytes};
use crate::message::Role;
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Maximum messages to keep per session (rolling window)
const MAX_MESSAGES_PER_SESSION: usize = 200;

/// A persisted admin turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Per-session overview
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub last_timestamp: Option<i64>,
}

enum Backend {
    Sqlite(Mutex<Connection>),
    Memory(RwLock<HashMap<String, Vec<AdminMessage>>>),
}

/// Admin conversation store with SQLite backend and in-memory fallback
pub struct AdminConversationStore {
    backend: Backend,
    max_messages: usize,
}

impl AdminConversationStore {
    /// Open or create the admin history database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        info!("Admin conversation store opened: {}", path.display());
        Ok(Self {
            backend: Backend::Sqlite(Mutex::new(conn)),
            max_messages: MAX_MESSAGES_PER_SESSION,
        })
    }

    /// Open the database, falling back to memory if that fails
    pub fn open_or_memory(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "Admin store unavailable at {} ({}), using in-memory fallback",
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
            max_messages: MAX_MESSAGES_PER_SESSION,
        }
    }

    /// Override the rolling window size
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Sqlite(_))
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS admin_conversations (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                embedding BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_admin_conversations_session
                ON admin_conversations(session_id, seq);
            "#,
        )?;
        Ok(())
    }

    /// Append a turn; returns its id
    pub fn add_message(&self, session_id: &str, role: Role, content: &str) -> Result<String> {
        let message = AdminMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            embedding: None,
        };

        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = conn.lock();
                // seq keeps insertion order when timestamps collide
                conn.execute(
                    "INSERT INTO admin_conversations (id, session_id, role, content, timestamp, seq)
                     VALUES (?1, ?2, ?3, ?4, ?5,
                        (SELECT COALESCE(MAX(seq), 0) + 1 FROM admin_conversations WHERE session_id = ?2))",
                    params![
                        message.id,
                        message.session_id,
                        message.role.as_str(),
                        message.content,
                        message.timestamp
                    ],
                )?;
                conn.execute(
                    "DELETE FROM admin_conversations
                     WHERE session_id = ?1 AND id NOT IN (
                         SELECT id FROM admin_conversations
                         WHERE session_id = ?1
                         ORDER BY seq DESC
                         LIMIT ?2
                     )",
                    params![session_id, self.max_messages as i64],
                )?;
            }
            Backend::Memory(map) => {
                let mut map = map.write();
                let history = map.entry(session_id.to_string()).or_default();
                history.push(message.clone());
                if history.len() > self.max_messages {
                    let excess = history.len() - self.max_messages;
                    history.drain(..excess);
                }
            }
        }

        debug!("Added {} admin message to session {}", role, session_id);
        Ok(message.id)
    }

    /// Store an embedding for an existing turn; false if the turn is gone
    pub fn attach_embedding(&self, message_id: &str, embedding: &[f32]) -> Result<bool> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let rows = conn.lock().execute(
                    "UPDATE admin_conversations SET embedding = ?1 WHERE id = ?2",
                    params![embedding_to_bytes(embedding), message_id],
                )?;
                Ok(rows > 0)
            }
            Backend::Memory(map) => {
                let mut map = map.write();
                let found = map
                    .values_mut()
                    .flat_map(|history| history.iter_mut())
                    .find(|m| m.id == message_id);
                match found {
                    Some(m) => {
                        m.embedding = Some(embedding.to_vec());
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Most recent `limit` turns of a session, oldest first
    pub fn get_history(&self, session_id: &str, limit: usize) -> Result<Vec<AdminMessage>> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = conn.lock();
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, timestamp, embedding
                     FROM admin_conversations
                     WHERE session_id = ?1
                     ORDER BY seq DESC
                     LIMIT ?2",
                )?;

                let mut messages = stmt
                    .query_map(params![session_id, limit as i64], |row| {
                        let role: String = row.get(2)?;
                        let embedding: Option<Vec<u8>> = row.get(5)?;
                        Ok(AdminMessage {
                            id: row.get(0)?,
                            session_id: row.get(1)?,
                            role: Role::parse(&role).unwrap_or(Role::User),
                            content: row.get(3)?,
                            timestamp: row.get(4)?,
                            embedding: embedding.map(|b| embedding_from_bytes(&b)),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                // Reverse to get chronological order
                messages.reverse();
                Ok(messages)
            }
            Backend::Memory(map) => {
                let map = map.read();
                let history = map.get(session_id).map(Vec::as_slice).unwrap_or_default();
                let start = history.len().saturating_sub(limit);
                Ok(history[start..].to_vec())
            }
        }
    }

    /// Clear a session; returns removed turn count
    pub fn clear(&self, session_id: &str) -> Result<usize> {
        let rows = match &self.backend {
            Backend::Sqlite(conn) => conn.lock().execute(
                "DELETE FROM admin_conversations WHERE session_id = ?1",
                params![session_id],
            )?,
            Backend::Memory(map) => map.write().remove(session_id).map(|h| h.len()).unwrap_or(0),
        };
        info!("Cleared {} admin messages from session {}", rows, session_id);
        Ok(rows)
    }

    /// All sessions, most recently active first
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = conn.lock();
                let mut stmt = conn.prepare(
                    "SELECT session_id, COUNT(*), MAX(timestamp)
                     FROM admin_conversations
                     GROUP BY session_id
                     ORDER BY MAX(timestamp) DESC",
                )?;
                let sessions = stmt
                    .query_map([], |row| {
                        Ok(SessionSummary {
                            session_id: row.get(0)?,
                            message_count: row.get::<_, i64>(1)? as usize,
                            last_timestamp: row.get(2)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(sessions)
            }
            Backend::Memory(map) => {
                let mut sessions: Vec<SessionSummary> = map
                    .read()
                    .iter()
                    .map(|(id, history)| SessionSummary {
                        session_id: id.clone(),
                        message_count: history.len(),
                        last_timestamp: history.last().map(|m| m.timestamp),
                    })
                    .collect();
                sessions.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
                Ok(sessions)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> (Vec<AdminConversationStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = AdminConversationStore::open(&dir.path().join("admin.db")).unwrap();
        (vec![AdminConversationStore::in_memory(), sqlite], dir)
    }

    #[test]
    fn test_add_and_get_history() {
        let (stores, _dir) = stores();
        for store in stores {
            store.add_message("s1", Role::User, "How did Q3 leads convert?").unwrap();
            store.add_message("s1", Role::Assistant, "Conversion was 12%.").unwrap();
            store.add_message("s1", Role::User, "And Q4?").unwrap();

            let history = store.get_history("s1", 10).unwrap();
            assert_eq!(history.len(), 3);
            assert_eq!(history[0].role, Role::User);
            assert!(history[0].content.contains("Q3"));
            assert_eq!(history[2].content, "And Q4?");

            let last_two = store.get_history("s1", 2).unwrap();
            assert_eq!(last_two[0].role, Role::Assistant);
        }
    }

    #[test]
    fn test_rolling_window() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = AdminConversationStore::open(&dir.path().join("w.db"))
            .unwrap()
            .with_max_messages(3);
        let memory = AdminConversationStore::in_memory().with_max_messages(3);

        for store in [memory, sqlite] {
            for i in 0..5 {
                store.add_message("s", Role::User, &format!("Message {}", i)).unwrap();
            }
            let history = store.get_history("s", 10).unwrap();
            assert_eq!(history.len(), 3);
            assert_eq!(history[0].content, "Message 2");
            assert_eq!(history[2].content, "Message 4");
        }
    }

    #[test]
    fn test_attach_embedding() {
        let (stores, _dir) = stores();
        for store in stores {
            let id = store.add_message("s1", Role::User, "embed me").unwrap();
            assert!(store.attach_embedding(&id, &[0.1, 0.2]).unwrap());
            assert!(!store.attach_embedding("missing", &[0.1]).unwrap());

            let history = store.get_history("s1", 1).unwrap();
            assert_eq!(history[0].embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
        }
    }

    #[test]
    fn test_session_isolation_and_clear() {
        let (stores, _dir) = stores();
        for store in stores {
            store.add_message("a", Role::User, "one").unwrap();
            store.add_message("b", Role::User, "two").unwrap();
            store.add_message("b", Role::Assistant, "three").unwrap();

            let sessions = store.list_sessions().unwrap();
            assert_eq!(sessions.len(), 2);

            assert_eq!(store.clear("b").unwrap(), 2);
            assert!(store.get_history("b", 10).unwrap().is_empty());
            assert_eq!(store.get_history("a", 10).unwrap().len(), 1);
        }
    }
}
