//! Person records: one `(id, name)` row per enrolled identity.
//!
//! Independent of the gallery store. The engine adds a row after a
//! successful enrollment and deletes it after removing the identity.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("creating {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub created_at: String,
}

pub struct PersonStore {
    conn: Connection,
}

impl PersonStore {
    pub fn open(path: &Path) -> Result<Self, RecordError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RecordError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, RecordError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RecordError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Return the row for `name`, inserting it first if absent.
    pub fn ensure(&self, name: &str) -> Result<Person, RecordError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO persons (name, created_at) VALUES (?1, ?2)",
            params![name, created_at],
        )?;
        if inserted > 0 {
            tracing::info!(name, "person record created");
        }
        Ok(self.conn.query_row(
            "SELECT id, name, created_at FROM persons WHERE name = ?1",
            params![name],
            row_to_person,
        )?)
    }

    pub fn get(&self, id: i64) -> Result<Option<Person>, RecordError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM persons WHERE id = ?1",
                params![id],
                row_to_person,
            )
            .optional()?)
    }

    pub fn list(&self) -> Result<Vec<Person>, RecordError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM persons ORDER BY id")?;
        let rows = stmt.query_map([], row_to_person)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns whether a row was deleted.
    pub fn delete(&self, id: i64) -> Result<bool, RecordError> {
        let deleted = self
            .conn
            .execute("DELETE FROM persons WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}
