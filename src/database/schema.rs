//! Catalog schema and connection setup.
//!
//! Table and column names, and the cascade-delete foreign keys, are the
//! on-disk contract: existing catalogs must keep working across releases.

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Current schema version, recorded on first open.
pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY,
        file_path TEXT NOT NULL UNIQUE,
        size INTEGER NOT NULL,
        created_at INTEGER,
        last_modified INTEGER NOT NULL,
        hash_sha256 TEXT
    );

    CREATE TABLE IF NOT EXISTS detections (
        id INTEGER PRIMARY KEY,
        image_id INTEGER NOT NULL,
        model TEXT NOT NULL,
        label TEXT NOT NULL,
        confidence REAL NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS empty_images (
        file_path TEXT NOT NULL UNIQUE,
        hash_sha256 TEXT
    );

    CREATE TABLE IF NOT EXISTS ocr_results (
        file_path TEXT NOT NULL UNIQUE,
        extracted_text TEXT NOT NULL,
        hash_sha256 TEXT
    );

    CREATE TABLE IF NOT EXISTS image_description (
        file_path TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        hash_sha256 TEXT
    );

    CREATE TABLE IF NOT EXISTS person (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS image_person_mapping (
        image_id INTEGER NOT NULL,
        person_id INTEGER NOT NULL,
        PRIMARY KEY(image_id, person_id),
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE,
        FOREIGN KEY(person_id) REFERENCES person(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS no_faces (
        file_path TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS qrcodes (
        id INTEGER PRIMARY KEY,
        image_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS no_qrcodes (
        file_path TEXT NOT NULL UNIQUE
    );

    CREATE INDEX IF NOT EXISTS idx_detections_image ON detections(image_id);
    CREATE INDEX IF NOT EXISTS idx_detections_label ON detections(label);
    CREATE INDEX IF NOT EXISTS idx_mapping_person ON image_person_mapping(person_id);
    CREATE INDEX IF NOT EXISTS idx_qrcodes_image ON qrcodes(image_id);

    CREATE VIRTUAL TABLE IF NOT EXISTS documents USING fts5(file_path, content);
";

/// Open or create a catalog database at the given path.
///
/// Applies WAL journaling and enables foreign keys, then creates any
/// missing tables. Safe to call on an existing catalog.
pub fn open_catalog(path: &Path) -> Result<Connection, SchemaError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Open an in-memory catalog with the full schema. Used by tests.
pub fn open_memory() -> Result<Connection, SchemaError> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), SchemaError> {
    conn.execute_batch(SCHEMA)?;

    let recorded: i64 =
        conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?;
    if recorded == 0 {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }
    Ok(())
}
