// SQLite storage for project state, summaries and conversation history
//
// One connection behind a mutex, shared by the repositories. Every open runs
// the schema migrations before the handle is returned.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::schema;

/// Pragmas applied to file-backed databases
const FILE_PRAGMAS: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA busy_timeout=5000;
    PRAGMA synchronous=NORMAL;
";

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file at `path`, creating parent folders
    pub fn new(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))?;
        conn.execute_batch(FILE_PRAGMAS)
            .map_err(|e| format!("Failed to configure database: {}", e))?;

        log::debug!("[Database] Opened {}", path.display());
        Self::migrated(conn)
    }

    /// Database that lives as long as the handle
    pub fn in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open in-memory database: {}", e))?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, String> {
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T, String>) -> Result<T, String> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("Database lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Run `f` in a transaction that commits only when `f` succeeds
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T, String>) -> Result<T, String> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| format!("Database lock poisoned: {}", e))?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("Failed to start transaction: {}", e))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| format!("Failed to commit transaction: {}", e))?;
        Ok(value)
    }

    /// Highest applied migration, 0 before the first one
    pub fn schema_version(&self) -> Result<i32, String> {
        self.with_connection(|conn| {
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| e.to_string())
        })
    }
}
