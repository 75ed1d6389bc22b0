//! SQLite persistence for patients and their analyses.

mod migrations;
mod models;
mod patients;
mod recordings;

use crate::config::StoreLocation;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub use models::{NewPatient, NewRecording, Patient, Recording};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One SQLite connection shared behind a mutex.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    location: StoreLocation,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .finish()
    }
}

impl Store {
    pub fn open(location: StoreLocation) -> Result<Self> {
        let conn = match &location {
            StoreLocation::Memory => Connection::open_in_memory()?,
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
        };

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;

        tracing::info!(location = %location, "database ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        // A panic while holding the lock leaves no partial transaction behind.
        let mut conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_file_database_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("em.db");
        let store = Store::open(StoreLocation::File(db_path.clone())).unwrap();
        assert!(db_path.exists());

        store
            .with_connection(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let location = StoreLocation::File(dir.path().join("em.db"));
        let id = {
            let store = Store::open(location.clone()).unwrap();
            store
                .add_patient(NewPatient {
                    name: "Ada".to_owned(),
                    age: 36,
                })
                .unwrap()
                .id
        };
        let store = Store::open(location).unwrap();
        assert_eq!(store.get_patient(id).unwrap().unwrap().name, "Ada");
    }
}
