//! SQLite store: connection setup, schema, seeding and the shared `Db` handle.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use rusqlite::Connection;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{sqlite_error_string, InvoiceError, Result};
use crate::{numbering, settings};

const SCHEMA_VERSION: i64 = 1;

pub fn now_iso() -> String {
    format_iso(OffsetDateTime::now_utc())
}

pub fn format_iso(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Opens (creating if needed) the database file and brings it to the current schema.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InvoiceError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
    }
    let conn = Connection::open(path)?;
    prepare(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    configure_sqlite(conn)?;
    init_schema(conn)?;
    apply_migrations(conn)?;
    settings::seed_defaults(conn)?;
    numbering::seed_counter(conn)?;
    Ok(())
}

fn configure_sqlite(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Busy timeout first so the remaining PRAGMAs wait on other writers.
    conn.busy_timeout(Duration::from_millis(5000))?;
    // Apply PRAGMAs on init (outside any transaction).
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n",
    )?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS invoice_counter (
            id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
            value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER REFERENCES clients(id) ON DELETE SET NULL,
            invoice_number TEXT UNIQUE,
            date TEXT NOT NULL,
            due_date TEXT,
            items TEXT NOT NULL DEFAULT '[]',
            subtotal REAL NOT NULL DEFAULT 0,
            vat REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            status TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_invoices_client_id ON invoices(client_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_date ON invoices(date);
        CREATE INDEX IF NOT EXISTS idx_clients_name ON clients(name);
        "#,
    )?;
    Ok(())
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    // v=0 means a fresh DB (init_schema created the latest tables).
    if v == 0 {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        return Ok(());
    }

    if v > SCHEMA_VERSION {
        return Err(InvoiceError::Unavailable(format!(
            "database schema version {v} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

/// Shared handle used by the HTTP layer. Blocking SQLite work runs on the
/// tokio blocking pool; cross-process exclusion comes from the IMMEDIATE
/// transactions inside the closures, not from the mutex.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        tracing::info!(path = %path.display(), "database ready");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub async fn with_read<T, F>(&self, op_name: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| InvoiceError::Unavailable("db mutex poisoned".to_string()))?;
            f(&guard).map_err(|e| log_failure(op_name, e))
        })
        .await
        .map_err(|e| InvoiceError::Unavailable(e.to_string()))?
    }

    pub async fn with_write<T, F>(&self, op_name: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| InvoiceError::Unavailable("db mutex poisoned".to_string()))?;
            f(&mut guard).map_err(|e| log_failure(op_name, e))
        })
        .await
        .map_err(|e| InvoiceError::Unavailable(e.to_string()))?
    }
}

fn log_failure(op_name: &'static str, err: InvoiceError) -> InvoiceError {
    match &err {
        InvoiceError::Storage(e) => {
            tracing::error!(op = op_name, error = %sqlite_error_string(e), "sqlite operation failed");
        }
        InvoiceError::Corrupt(e) => {
            tracing::error!(op = op_name, error = %e, "stored row could not be decoded");
        }
        other => tracing::debug!(op = op_name, error = %other, "operation rejected"),
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_is_seeded() {
        let conn = open_in_memory().unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let counter: i64 = conn
            .query_row("SELECT value FROM invoice_counter WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(counter, 0);

        let prefix: String = conn
            .query_row("SELECT value FROM settings WHERE key = 'invoice_prefix'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(prefix, "INV");
    }

    #[test]
    fn reopening_a_file_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("invoices.db");
        {
            let conn = open_connection(&path).unwrap();
            conn.execute("UPDATE invoice_counter SET value = 41 WHERE id = 1", [])
                .unwrap();
        }
        let conn = open_connection(&path).unwrap();
        let counter: i64 = conn
            .query_row("SELECT value FROM invoice_counter WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(counter, 41);
    }

    #[tokio::test]
    async fn db_handle_propagates_closure_errors() {
        let db = Db::open_in_memory().unwrap();
        let err = db
            .with_read("always_missing", |_conn| -> Result<()> {
                Err(InvoiceError::invoice_not_found(1))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NotFound { entity: "invoice", id: 1 }));
    }
}
