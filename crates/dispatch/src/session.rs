//! Session Store
//!
//! The authentication collaborator owns the vehicle identity and writes it
//! under two keys ([`SESSION_TOKEN_KEY`], [`SESSION_INFO_KEY`]). The core only
//! reads it through [`SessionProvider`]; [`SessionStore`] adds the write side
//! for tools that play the collaborator's role.

use resq_domain::{Session, SESSION_INFO_KEY, SESSION_TOKEN_KEY};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

/// Abstract "current session" accessor injected into the core
pub trait SessionProvider: Send + Sync + 'static {
    /// Current vehicle identity, or `None` when nobody is logged in.
    fn current_session(&self) -> Option<Session>;
}

/// Read/write contract of the cached identity
pub trait SessionStore: SessionProvider {
    /// Persist `session`, replacing any previous identity.
    fn save(&self, session: &Session) -> Result<()>;

    /// Forget the cached identity.
    fn clear(&self) -> Result<()>;
}

/// Rebuild a session from raw key/value entries.
///
/// Unusable entries are logged and read as "no session".
fn session_from_entries(token: Option<String>, info: Option<String>) -> Option<Session> {
    let (token, info) = match (token, info) {
        (Some(t), Some(i)) => (t, i),
        _ => return None,
    };
    match Session::from_stored(&token, &info) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "Cached vehicle identity is unusable");
            None
        }
    }
}

/// Session cache backed by a SQLite key/value table
#[derive(Debug)]
pub struct SqliteSessionStore {
    db: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_connection(Connection::open(db_path)?)
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| DispatchError::SessionStore("session store lock poisoned".to_string()))
    }

    fn read(db: &Connection, key: &str) -> Result<Option<String>> {
        let value = db
            .query_row(
                "SELECT value FROM session_kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn load(&self) -> Result<Option<Session>> {
        let db = self.lock()?;
        let token = Self::read(&db, SESSION_TOKEN_KEY)?;
        let info = Self::read(&db, SESSION_INFO_KEY)?;
        Ok(session_from_entries(token, info))
    }
}

impl SessionProvider for SqliteSessionStore {
    fn current_session(&self) -> Option<Session> {
        match self.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Failed to read session store");
                None
            }
        }
    }
}

impl SessionStore for SqliteSessionStore {
    fn save(&self, session: &Session) -> Result<()> {
        let info = session.to_stored_info()?;
        let mut db = self.lock()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO session_kv (key, value) VALUES (?1, ?2)",
            params![SESSION_TOKEN_KEY, session.token],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO session_kv (key, value) VALUES (?1, ?2)",
            params![SESSION_INFO_KEY, info],
        )?;
        tx.commit()?;
        debug!(vehicle_id = session.vehicle_id, "Session saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "DELETE FROM session_kv WHERE key IN (?1, ?2)",
            params![SESSION_TOKEN_KEY, SESSION_INFO_KEY],
        )?;
        debug!("Session cleared");
        Ok(())
    }
}

/// In-process session cache
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<&'static str, String>>,
}

impl MemorySessionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `session`
    pub fn with_session(session: &Session) -> Result<Self> {
        let store = Self::new();
        store.save(session)?;
        Ok(store)
    }

    /// Write one raw entry, as the login flow would.
    pub fn put_raw(&self, key: &'static str, value: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, value.into());
        }
    }
}

impl SessionProvider for MemorySessionStore {
    fn current_session(&self) -> Option<Session> {
        let entries = self.entries.lock().ok()?;
        session_from_entries(
            entries.get(SESSION_TOKEN_KEY).cloned(),
            entries.get(SESSION_INFO_KEY).cloned(),
        )
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<()> {
        let info = session.to_stored_info()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DispatchError::SessionStore("session store lock poisoned".to_string()))?;
        entries.insert(SESSION_TOKEN_KEY, session.token.clone());
        entries.insert(SESSION_INFO_KEY, info);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DispatchError::SessionStore("session store lock poisoned".to_string()))?;
        entries.clear();
        Ok(())
    }
}
