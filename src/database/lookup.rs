//! Read-side queries: prefetched existing-artifact indexes, the detection
//! freshness check, point lookups, and catalog statistics.
//!
//! Indexes are loaded once per run so the per-file "already done" checks
//! during a batch never round-trip to the database.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::database::modality::{TableKey, MODALITY_TABLES};
use crate::database::writer::CatalogError;

/// path → stored content hash for every artifact row.
pub fn image_index(conn: &Connection) -> Result<HashMap<String, Option<String>>, CatalogError> {
    let mut stmt = conn.prepare("SELECT file_path, hash_sha256 FROM images")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// path → stored hash for analyzed-but-empty detection markers.
pub fn empty_image_index(
    conn: &Connection,
) -> Result<HashMap<String, Option<String>>, CatalogError> {
    let mut stmt = conn.prepare("SELECT file_path, hash_sha256 FROM empty_images")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// path → stored `last_modified` for artifacts that already have at least
/// one detection row from `model`.
pub fn detection_index(
    conn: &Connection,
    model: &str,
) -> Result<HashMap<String, i64>, CatalogError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT i.file_path, i.last_modified
         FROM images i JOIN detections d ON d.image_id = i.id
         WHERE d.model = ?1",
    )?;
    let rows = stmt.query_map(params![model], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// The artifact is fully analyzed for `model` iff a detection row exists
/// and the stored modification time still matches the file's current one.
/// A touched-but-unchanged file therefore counts as stale; changed content
/// behind an unchanged mtime does not.
pub fn detection_fresh(
    conn: &Connection,
    path: &Path,
    model: &str,
    current_mtime: i64,
) -> Result<bool, CatalogError> {
    let fresh: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM images i JOIN detections d ON d.image_id = i.id
             WHERE i.file_path = ?1 AND d.model = ?2 AND i.last_modified = ?3
         )",
        params![path.to_string_lossy(), model, current_mtime],
        |row| row.get(0),
    )?;
    Ok(fresh)
}

fn path_set(conn: &Connection, sql: &str) -> Result<HashSet<String>, CatalogError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// Paths with an OCR row (empty text included).
pub fn ocr_paths(conn: &Connection) -> Result<HashSet<String>, CatalogError> {
    path_set(conn, "SELECT file_path FROM ocr_results")
}

/// Paths with a caption row.
pub fn description_paths(conn: &Connection) -> Result<HashSet<String>, CatalogError> {
    path_set(conn, "SELECT file_path FROM image_description")
}

/// Paths present in the full-text document index.
pub fn document_paths(conn: &Connection) -> Result<HashSet<String>, CatalogError> {
    path_set(conn, "SELECT file_path FROM documents")
}

/// Paths for which face recognition already ran: either a no-face marker
/// or at least one person link.
pub fn face_done_paths(conn: &Connection) -> Result<HashSet<String>, CatalogError> {
    path_set(
        conn,
        "SELECT file_path FROM no_faces
         UNION
         SELECT DISTINCT i.file_path
         FROM image_person_mapping m JOIN images i ON i.id = m.image_id",
    )
}

/// Paths for which barcode scanning already ran.
pub fn qr_done_paths(conn: &Connection) -> Result<HashSet<String>, CatalogError> {
    path_set(
        conn,
        "SELECT file_path FROM no_qrcodes
         UNION
         SELECT DISTINCT i.file_path
         FROM qrcodes q JOIN images i ON i.id = q.image_id",
    )
}

/// Total rows, across every modality table and the artifact row itself,
/// that still reference `path` directly or via its artifact id.
pub fn rows_referencing(conn: &Connection, path: &Path) -> Result<i64, CatalogError> {
    let path_s = path.to_string_lossy().to_string();
    let image_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM images WHERE file_path = ?1",
            params![path_s],
            |row| row.get(0),
        )
        .optional()?;

    let mut total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM images WHERE file_path = ?1",
        params![path_s],
        |row| row.get(0),
    )?;
    for table in MODALITY_TABLES {
        match table.key {
            TableKey::FilePath => {
                total += conn.query_row(table.count_sql, params![path_s], |row| {
                    row.get::<_, i64>(0)
                })?;
            }
            TableKey::ImageId => {
                if let Some(id) = image_id {
                    total += conn.query_row(table.count_sql, params![id], |row| {
                        row.get::<_, i64>(0)
                    })?;
                }
            }
        }
    }
    Ok(total)
}

/// Point lookup: everything the catalog knows about one path.
#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    pub file_path: String,
    pub size: i64,
    pub last_modified: i64,
    pub hash_sha256: Option<String>,
    pub labels: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels_current: Option<bool>,
    pub people: Vec<String>,
    pub qr_payloads: Vec<String>,
    pub ocr_text: Option<String>,
    pub description: Option<String>,
    pub has_document: bool,
}

/// `labels_current` in the result says whether the stored detections for
/// `model` still match the file's modification time; `None` when there
/// are no detections or the file is gone.
pub fn artifact_summary(
    conn: &Connection,
    path: &Path,
    model: &str,
) -> Result<Option<ArtifactSummary>, CatalogError> {
    let path_s = path.to_string_lossy().to_string();
    let base: Option<(i64, i64, i64, Option<String>)> = conn
        .query_row(
            "SELECT id, size, last_modified, hash_sha256 FROM images WHERE file_path = ?1",
            params![path_s],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let ocr_text: Option<String> = conn
        .query_row(
            "SELECT extracted_text FROM ocr_results WHERE file_path = ?1",
            params![path_s],
            |row| row.get(0),
        )
        .optional()?;
    let description: Option<String> = conn
        .query_row(
            "SELECT description FROM image_description WHERE file_path = ?1",
            params![path_s],
            |row| row.get(0),
        )
        .optional()?;
    let has_document: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM documents WHERE file_path = ?1)",
        params![path_s],
        |row| row.get(0),
    )?;

    let Some((id, size, last_modified, hash_sha256)) = base else {
        // Path-keyed modalities can exist without an artifact row.
        if ocr_text.is_none() && description.is_none() && !has_document {
            return Ok(None);
        }
        return Ok(Some(ArtifactSummary {
            file_path: path_s,
            size: 0,
            last_modified: 0,
            hash_sha256: None,
            labels: Vec::new(),
            labels_current: None,
            people: Vec::new(),
            qr_payloads: Vec::new(),
            ocr_text,
            description,
            has_document,
        }));
    };

    let mut stmt = conn.prepare(
        "SELECT label, MAX(confidence) FROM detections WHERE image_id = ?1
         GROUP BY label ORDER BY MAX(confidence) DESC",
    )?;
    let labels = stmt
        .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<(String, f64)>, _>>()?;

    let mut labels_current = None;
    if !labels.is_empty() {
        if let Some(mtime) = fs::metadata(path)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        {
            labels_current = Some(detection_fresh(conn, path, model, mtime.as_secs() as i64)?);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT p.name FROM person p
         JOIN image_person_mapping m ON m.person_id = p.id
         WHERE m.image_id = ?1 ORDER BY p.name",
    )?;
    let people = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    let mut stmt =
        conn.prepare("SELECT content FROM qrcodes WHERE image_id = ?1 ORDER BY id")?;
    let qr_payloads = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(Some(ArtifactSummary {
        file_path: path_s,
        size,
        last_modified,
        hash_sha256,
        labels,
        labels_current,
        people,
        qr_payloads,
        ocr_text,
        description,
        has_document,
    }))
}

/// Per-table row counts.
#[derive(Debug, Serialize)]
pub struct CatalogStats {
    pub images: i64,
    pub detections: i64,
    pub empty_images: i64,
    pub ocr_results: i64,
    pub descriptions: i64,
    pub persons: i64,
    pub person_links: i64,
    pub no_faces: i64,
    pub qrcodes: i64,
    pub no_qrcodes: i64,
    pub documents: i64,
}

pub fn catalog_stats(conn: &Connection) -> Result<CatalogStats, CatalogError> {
    let count = |sql: &str| -> Result<i64, rusqlite::Error> {
        conn.query_row(sql, [], |row| row.get(0))
    };
    Ok(CatalogStats {
        images: count("SELECT COUNT(*) FROM images")?,
        detections: count("SELECT COUNT(*) FROM detections")?,
        empty_images: count("SELECT COUNT(*) FROM empty_images")?,
        ocr_results: count("SELECT COUNT(*) FROM ocr_results")?,
        descriptions: count("SELECT COUNT(*) FROM image_description")?,
        persons: count("SELECT COUNT(*) FROM person")?,
        person_links: count("SELECT COUNT(*) FROM image_person_mapping")?,
        no_faces: count("SELECT COUNT(*) FROM no_faces")?,
        qrcodes: count("SELECT COUNT(*) FROM qrcodes")?,
        no_qrcodes: count("SELECT COUNT(*) FROM no_qrcodes")?,
        documents: count("SELECT COUNT(*) FROM documents")?,
    })
}
