//! Shared SQLite connection.
//!
//! Capture hooks run on transport threads while readers page through the
//! same file, so every statement goes through one locked connection. The
//! lock is also what makes the conditional completion update atomic.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, StorageError};
use crate::schema::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Negative means KiB.
const CACHE_SIZE_KIB: i64 = -8000;

/// Cloneable handle to the migrated capture database.
#[derive(Clone)]
pub struct SharedConnection {
    conn: Arc<Mutex<Connection>>,
}

impl SharedConnection {
    /// Opens (or creates) a capture database file and migrates it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        configure(&conn, true)?;
        Self::migrated(conn)
    }

    /// A private in-memory capture database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, false)?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Waits for exclusive use of the connection.
    pub fn lock(&self) -> Result<LockedConnection<'_>> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))?;

        Ok(LockedConnection { guard })
    }
}

fn configure(conn: &Connection, file_backed: bool) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // Bodies are large blobs; WAL keeps readers off the writer's lock
    if file_backed {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    conn.pragma_update(None, "cache_size", CACHE_SIZE_KIB)?;

    Ok(())
}

/// Exclusive access to the connection until dropped.
pub struct LockedConnection<'a> {
    guard: MutexGuard<'a, Connection>,
}

impl std::ops::Deref for LockedConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use ceptor_core::{Headers, NewTransaction, RequestRecord};
    use chrono::Utc;

    use crate::repository::TransactionRepo;

    fn request(n: usize) -> NewTransaction {
        NewTransaction {
            request: RequestRecord {
                method: "GET".to_string(),
                url: format!("https://example.com/{}", n),
                headers: Headers::new(),
                body: None,
            },
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_is_migrated() {
        let shared = SharedConnection::in_memory().unwrap();
        let conn = shared.lock().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_clones_share_one_database() {
        let shared = SharedConnection::in_memory().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let conn = shared.lock().unwrap();
                    TransactionRepo::insert(&conn, &request(n)).unwrap()
                })
            })
            .collect();

        let mut ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);

        let conn = shared.lock().unwrap();
        assert_eq!(TransactionRepo::count(&conn, &Default::default()).unwrap(), 4);
    }

    #[test]
    fn test_file_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.db");

        let shared = SharedConnection::open(&path).unwrap();
        let mode: String = shared
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(path.exists());
    }
}
