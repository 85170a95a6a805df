//! Idempotent write operations, one per modality.
//!
//! Every operation is safe to call redundantly: unique violations are
//! absorbed with `INSERT OR IGNORE` or guarded inserts rather than
//! pre-checks, so at-least-once callers never see a duplicate row or a
//! constraint failure. All mutations run under the retry policy.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use crate::database::retry::{execute_with_retry, RetryPolicy};
use crate::ingest::hasher;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to read artifact {path}: {source}")]
    ArtifactRead {
        path: String,
        source: std::io::Error,
    },
}

/// One detected object label with its confidence score in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
}

/// Write handle for the catalog: one connection, one retry policy.
pub struct Catalog {
    conn: Connection,
    retry: RetryPolicy,
}

impl Catalog {
    pub fn new(conn: Connection, retry: RetryPolicy) -> Self {
        Self { conn, retry }
    }

    /// Read-only access for query paths; reads do not contend with the
    /// single-writer lock and skip the retry layer.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Ensure an `images` row exists for `path` and return `(id, hash)`.
    ///
    /// On first sight the file is stat'ed and hashed. An existing row is
    /// left alone while the stored modification time still matches the
    /// file; a NULL hash is backfilled, and a changed mtime refreshes
    /// size, mtime and hash so re-indexing converges instead of
    /// re-triggering forever.
    pub fn record_image(&self, path: &Path) -> Result<(i64, String), CatalogError> {
        let path_s = path.to_string_lossy().to_string();
        let meta = std::fs::metadata(path).map_err(|source| CatalogError::ArtifactRead {
            path: path_s.clone(),
            source,
        })?;
        let modified = meta
            .modified()
            .ok()
            .and_then(epoch_secs)
            .unwrap_or_default();
        let created = meta.created().ok().and_then(epoch_secs);

        let existing: Option<(i64, Option<String>, i64)> = self
            .conn
            .query_row(
                "SELECT id, hash_sha256, last_modified FROM images WHERE file_path = ?1",
                params![path_s],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match existing {
            Some((id, Some(hash), stored_mtime)) if stored_mtime == modified => Ok((id, hash)),
            Some((id, _, stored_mtime)) => {
                let hash = self.hash_artifact(path, &path_s)?;
                if stored_mtime == modified {
                    // Hash backfill only; identity and timestamps stand.
                    execute_with_retry(
                        &self.retry,
                        &self.conn,
                        "UPDATE images SET hash_sha256 = ?2 WHERE id = ?1",
                        params![id, hash],
                    )?;
                } else {
                    execute_with_retry(
                        &self.retry,
                        &self.conn,
                        "UPDATE images SET size = ?2, last_modified = ?3, hash_sha256 = ?4
                         WHERE id = ?1",
                        params![id, meta.len() as i64, modified, hash],
                    )?;
                }
                Ok((id, hash))
            }
            None => {
                let hash = self.hash_artifact(path, &path_s)?;
                execute_with_retry(
                    &self.retry,
                    &self.conn,
                    "INSERT OR IGNORE INTO images (file_path, size, created_at, last_modified, hash_sha256)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![path_s, meta.len() as i64, created, modified, hash],
                )?;
                let id: i64 = self.conn.query_row(
                    "SELECT id FROM images WHERE file_path = ?1",
                    params![path_s],
                    |row| row.get(0),
                )?;
                Ok((id, hash))
            }
        }
    }

    /// Insert one detection row per tuple. No deduplication: the freshness
    /// check upstream decides whether a (artifact, model) pair runs again.
    pub fn record_detections(
        &self,
        image_id: i64,
        model: &str,
        detections: &[Detection],
    ) -> Result<(), CatalogError> {
        for d in detections {
            execute_with_retry(
                &self.retry,
                &self.conn,
                "INSERT INTO detections (image_id, model, label, confidence)
                 VALUES (?1, ?2, ?3, ?4)",
                params![image_id, model, d.label, d.confidence],
            )?;
        }
        Ok(())
    }

    /// Mark `path` as analyzed-with-zero-detections, refreshing the stored
    /// hash when the content changed while the marker persisted.
    pub fn record_empty_image(&self, path: &Path, hash: &str) -> Result<(), CatalogError> {
        execute_with_retry(
            &self.retry,
            &self.conn,
            "INSERT INTO empty_images (file_path, hash_sha256) VALUES (?1, ?2)
             ON CONFLICT(file_path) DO UPDATE SET hash_sha256 = excluded.hash_sha256",
            params![path.to_string_lossy(), hash],
        )?;
        Ok(())
    }

    /// Record OCR output. An empty string is meaningful: the recognizer ran
    /// and found no text, which is not the same as never having run.
    pub fn record_ocr_text(&self, path: &Path, text: &str) -> Result<(), CatalogError> {
        let hash = hasher::hash_file(path).ok();
        execute_with_retry(
            &self.retry,
            &self.conn,
            "INSERT OR IGNORE INTO ocr_results (file_path, extracted_text, hash_sha256)
             VALUES (?1, ?2, ?3)",
            params![path.to_string_lossy(), text, hash],
        )?;
        Ok(())
    }

    /// Record a caption. Same empty-string semantics as OCR.
    pub fn record_description(&self, path: &Path, text: &str) -> Result<(), CatalogError> {
        let hash = hasher::hash_file(path).ok();
        execute_with_retry(
            &self.retry,
            &self.conn,
            "INSERT OR IGNORE INTO image_description (file_path, description, hash_sha256)
             VALUES (?1, ?2, ?3)",
            params![path.to_string_lossy(), text, hash],
        )?;
        Ok(())
    }

    /// Link `path` to every named person, creating Person rows lazily and
    /// ignoring links that already exist.
    pub fn record_person_links(&self, path: &Path, names: &[String]) -> Result<(), CatalogError> {
        if names.is_empty() {
            return Ok(());
        }
        let (image_id, _) = self.record_image(path)?;
        for name in names {
            execute_with_retry(
                &self.retry,
                &self.conn,
                "INSERT OR IGNORE INTO person (name) VALUES (?1)",
                params![name],
            )?;
            let person_id: i64 = self.conn.query_row(
                "SELECT id FROM person WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            execute_with_retry(
                &self.retry,
                &self.conn,
                "INSERT OR IGNORE INTO image_person_mapping (image_id, person_id)
                 VALUES (?1, ?2)",
                params![image_id, person_id],
            )?;
        }
        Ok(())
    }

    /// Record decoded barcode payloads, suppressing duplicate
    /// (artifact, content) pairs.
    pub fn record_qr_payloads(&self, path: &Path, payloads: &[String]) -> Result<(), CatalogError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let (image_id, _) = self.record_image(path)?;
        for content in payloads {
            execute_with_retry(
                &self.retry,
                &self.conn,
                "INSERT INTO qrcodes (image_id, content)
                 SELECT ?1, ?2
                 WHERE NOT EXISTS (
                     SELECT 1 FROM qrcodes WHERE image_id = ?1 AND content = ?2
                 )",
                params![image_id, content],
            )?;
        }
        Ok(())
    }

    /// Mark `path` as scanned-with-no-barcodes.
    pub fn record_no_qr(&self, path: &Path) -> Result<(), CatalogError> {
        execute_with_retry(
            &self.retry,
            &self.conn,
            "INSERT OR IGNORE INTO no_qrcodes (file_path) VALUES (?1)",
            params![path.to_string_lossy()],
        )?;
        Ok(())
    }

    /// Mark `path` as scanned-with-no-recognized-faces.
    pub fn record_no_faces(&self, path: &Path) -> Result<(), CatalogError> {
        execute_with_retry(
            &self.retry,
            &self.conn,
            "INSERT OR IGNORE INTO no_faces (file_path) VALUES (?1)",
            params![path.to_string_lossy()],
        )?;
        Ok(())
    }

    /// True when a document row for `path` exists. Callers check this
    /// before converting a document to text so the (expensive) conversion
    /// is never wasted on an already-indexed path.
    pub fn has_document(&self, path: &Path) -> Result<bool, CatalogError> {
        let present: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE file_path = ?1)",
            params![path.to_string_lossy()],
            |row| row.get(0),
        )?;
        Ok(present)
    }

    /// Insert extracted document text into the full-text index, once.
    pub fn record_document(&self, path: &Path, text: &str) -> Result<(), CatalogError> {
        if self.has_document(path)? {
            debug!(path = %path.display(), "document already indexed");
            return Ok(());
        }
        execute_with_retry(
            &self.retry,
            &self.conn,
            "INSERT INTO documents (file_path, content) VALUES (?1, ?2)",
            params![path.to_string_lossy(), text],
        )?;
        Ok(())
    }

    fn hash_artifact(&self, path: &Path, path_s: &str) -> Result<String, CatalogError> {
        hasher::hash_file(path).map_err(|source| CatalogError::ArtifactRead {
            path: path_s.to_string(),
            source,
        })
    }
}

fn epoch_secs(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::open_memory;
    use std::fs;
    use std::time::Duration;

    fn test_catalog() -> Catalog {
        Catalog::new(open_memory().unwrap(), RetryPolicy::default())
    }

    fn count(catalog: &Catalog, sql: &str, path: &Path) -> i64 {
        catalog
            .conn()
            .query_row(sql, params![path.to_string_lossy()], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn record_image_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"jpeg bytes").unwrap();

        let catalog = test_catalog();
        let (id1, hash1) = catalog.record_image(&file).unwrap();
        let (id2, hash2) = catalog.record_image(&file).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(hash1, hash2);
        assert_eq!(
            count(&catalog, "SELECT COUNT(*) FROM images WHERE file_path = ?1", &file),
            1
        );
    }

    #[test]
    fn record_image_refreshes_metadata_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"v1").unwrap();

        let catalog = test_catalog();
        let (id, _) = catalog.record_image(&file).unwrap();
        let stored: i64 = catalog
            .conn()
            .query_row(
                "SELECT last_modified FROM images WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();

        let touched = SystemTime::UNIX_EPOCH + Duration::from_secs((stored + 1000) as u64);
        let handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
        handle.set_modified(touched).unwrap();

        let (id_again, _) = catalog.record_image(&file).unwrap();
        assert_eq!(id, id_again);
        let refreshed: i64 = catalog
            .conn()
            .query_row(
                "SELECT last_modified FROM images WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(refreshed, stored + 1000);
    }

    #[test]
    fn ocr_and_description_insert_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.png");
        fs::write(&file, b"png").unwrap();

        let catalog = test_catalog();
        catalog.record_ocr_text(&file, "first").unwrap();
        catalog.record_ocr_text(&file, "second call must not replace").unwrap();
        let text: String = catalog
            .conn()
            .query_row(
                "SELECT extracted_text FROM ocr_results WHERE file_path = ?1",
                params![file.to_string_lossy()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(text, "first");

        // Empty string is a valid, meaningful value.
        catalog.record_description(&file, "").unwrap();
        catalog.record_description(&file, "late caption").unwrap();
        let caption: String = catalog
            .conn()
            .query_row(
                "SELECT description FROM image_description WHERE file_path = ?1",
                params![file.to_string_lossy()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(caption, "");
    }

    #[test]
    fn person_links_dedupe_and_create_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("group.jpg");
        fs::write(&file, b"jpg").unwrap();

        let catalog = test_catalog();
        let names = vec!["Ada".to_string(), "Grace".to_string()];
        catalog.record_person_links(&file, &names).unwrap();
        catalog.record_person_links(&file, &names).unwrap();

        let people: i64 = catalog
            .conn()
            .query_row("SELECT COUNT(*) FROM person", [], |row| row.get(0))
            .unwrap();
        let links: i64 = catalog
            .conn()
            .query_row("SELECT COUNT(*) FROM image_person_mapping", [], |row| row.get(0))
            .unwrap();
        assert_eq!(people, 2);
        assert_eq!(links, 2);
    }

    #[test]
    fn qr_payloads_suppress_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("code.png");
        fs::write(&file, b"png").unwrap();

        let catalog = test_catalog();
        let payloads = vec!["https://example.com".to_string()];
        catalog.record_qr_payloads(&file, &payloads).unwrap();
        catalog.record_qr_payloads(&file, &payloads).unwrap();
        let rows: i64 = catalog
            .conn()
            .query_row("SELECT COUNT(*) FROM qrcodes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn empty_marker_updates_hash_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blank.jpg");
        fs::write(&file, b"jpg").unwrap();

        let catalog = test_catalog();
        catalog.record_empty_image(&file, "aaaa").unwrap();
        catalog.record_empty_image(&file, "bbbb").unwrap();
        let (rows, hash): (i64, String) = catalog
            .conn()
            .query_row(
                "SELECT COUNT(*), hash_sha256 FROM empty_images WHERE file_path = ?1",
                params![file.to_string_lossy()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(hash, "bbbb");
    }

    #[test]
    fn empty_marker_and_detections_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("late.jpg");
        fs::write(&file, b"jpg").unwrap();

        let catalog = test_catalog();
        catalog.record_empty_image(&file, "cafe").unwrap();
        let (image_id, _) = catalog.record_image(&file).unwrap();
        catalog
            .record_detections(
                image_id,
                "yolov5s",
                &[Detection {
                    label: "cat".to_string(),
                    confidence: 0.9,
                }],
            )
            .unwrap();

        // The stale marker is not reconciled away; behavior is additive.
        assert_eq!(
            count(&catalog, "SELECT COUNT(*) FROM empty_images WHERE file_path = ?1", &file),
            1
        );
        let detections: i64 = catalog
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM detections WHERE image_id = ?1",
                params![image_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(detections, 1);
    }

    #[test]
    fn document_inserts_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("paper.pdf");
        fs::write(&file, b"pdf").unwrap();

        let catalog = test_catalog();
        assert!(!catalog.has_document(&file).unwrap());
        catalog.record_document(&file, "alpha beta gamma").unwrap();
        assert!(catalog.has_document(&file).unwrap());
        catalog.record_document(&file, "different text").unwrap();
        assert_eq!(
            count(&catalog, "SELECT COUNT(*) FROM documents WHERE file_path = ?1", &file),
            1
        );
    }
}
