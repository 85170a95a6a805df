//! Multi-modal search dispatch.
//!
//! One query fans out to every enabled modality; each builds and runs its
//! own statement and the results are merged into a single report with no
//! cross-modality ranking. Ordering inside a modality is by path.

use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use tracing::debug;

use crate::database::modality::{ModalitySet, SearchModality};
use crate::database::writer::CatalogError;
use crate::ingest::scanner::{absolutize, is_excluded};
use crate::search::terms;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub modalities: ModalitySet,
    pub exact: bool,
    pub min_confidence: f64,
    pub exclusions: Vec<PathBuf>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            modalities: ModalitySet::all(),
            exact: false,
            min_confidence: 0.0,
            exclusions: Vec::new(),
        }
    }
}

/// One matched artifact within a modality.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRow {
    pub path: String,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A modality's share of the result set.
#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    pub modality: SearchModality,
    pub count: usize,
    pub rows: Vec<SearchRow>,
}

/// The full result envelope handed to presentation. Consumers render this
/// as-is and never re-query the catalog.
#[derive(Debug, Serialize)]
pub struct SearchReport {
    pub query: String,
    pub outcomes: Vec<SearchOutcome>,
}

pub fn dispatch(
    conn: &Connection,
    request: &SearchRequest,
) -> Result<SearchReport, CatalogError> {
    // Stored paths are absolute; exclusion prefixes resolve the same way
    // the scan planner's do, so a relative prefix still matches.
    let exclusions: Vec<PathBuf> = request.exclusions.iter().map(|p| absolutize(p)).collect();

    let mut outcomes = Vec::new();
    for modality in SearchModality::ALL {
        if !request.modalities.contains(modality) {
            continue;
        }
        let rows = match modality {
            SearchModality::Labels => search_labels(conn, request)?,
            SearchModality::Ocr => {
                search_text_column(conn, "ocr_results", "extracted_text", request)?
            }
            SearchModality::Descriptions => {
                search_text_column(conn, "image_description", "description", request)?
            }
            SearchModality::Documents => {
                search_text_column(conn, "documents", "content", request)?
            }
            SearchModality::Qr => search_qr(conn, request)?,
            SearchModality::People => search_people(conn, request)?,
        };
        let rows = drop_excluded(rows, &exclusions);
        outcomes.push(SearchOutcome {
            modality,
            count: rows.len(),
            rows,
        });
    }
    Ok(SearchReport {
        query: request.query.clone(),
        outcomes,
    })
}

/// Label matches grouped by path with the best confidence per artifact.
/// The minimum-confidence threshold is applied here, after the query, so
/// it filters presentation rather than storage.
fn search_labels(
    conn: &Connection,
    request: &SearchRequest,
) -> Result<Vec<SearchRow>, CatalogError> {
    if request.query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("%{}%", request.query);
    let mut stmt = conn.prepare(
        "SELECT i.file_path, d.label, MAX(d.confidence)
         FROM detections d JOIN images i ON i.id = d.image_id
         WHERE d.label LIKE ?1
         GROUP BY i.file_path
         ORDER BY i.file_path",
    )?;
    let matched = stmt
        .query_map(params![pattern], |row| {
            Ok(SearchRow {
                path: row.get(0)?,
                payload: row.get(1)?,
                confidence: Some(row.get(2)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let raw = matched.len();
    let rows: Vec<SearchRow> = matched
        .into_iter()
        .filter(|r| r.confidence.map_or(false, |c| c >= request.min_confidence))
        .collect();
    if rows.len() != raw {
        debug!(raw, kept = rows.len(), "confidence threshold dropped label matches");
    }
    Ok(rows)
}

/// Conjunctive multi-keyword filter: every token must appear in the same
/// text column. Zero tokens yield an empty outcome rather than a full scan.
fn search_text_column(
    conn: &Connection,
    table: &str,
    column: &str,
    request: &SearchRequest,
) -> Result<Vec<SearchRow>, CatalogError> {
    let tokens = terms::tokenize(&request.query, request.exact);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!("SELECT file_path, {column} FROM {table} WHERE ");
    for i in 1..=tokens.len() {
        if i > 1 {
            sql.push_str(" AND ");
        }
        sql.push_str(&format!("{column} LIKE ?{i}"));
    }
    sql.push_str(" ORDER BY file_path");

    let patterns = tokens.iter().map(|t| format!("%{t}%"));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(patterns), |row| {
            Ok(SearchRow {
                path: row.get(0)?,
                payload: row.get(1)?,
                confidence: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn search_qr(
    conn: &Connection,
    request: &SearchRequest,
) -> Result<Vec<SearchRow>, CatalogError> {
    if request.query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("%{}%", request.query);
    let mut stmt = conn.prepare(
        "SELECT i.file_path, q.content
         FROM qrcodes q JOIN images i ON i.id = q.image_id
         WHERE q.content LIKE ?1
         ORDER BY i.file_path, q.content",
    )?;
    let rows = stmt
        .query_map(params![pattern], |row| {
            Ok(SearchRow {
                path: row.get(0)?,
                payload: row.get(1)?,
                confidence: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Two-step person search: match names first, then join the matched ids
/// back to artifact paths.
fn search_people(
    conn: &Connection,
    request: &SearchRequest,
) -> Result<Vec<SearchRow>, CatalogError> {
    if request.query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("%{}%", request.query);
    let mut stmt = conn.prepare("SELECT id FROM person WHERE name LIKE ?1")?;
    let ids = stmt
        .query_map(params![pattern], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT i.file_path, p.name
         FROM image_person_mapping m
         JOIN images i ON i.id = m.image_id
         JOIN person p ON p.id = m.person_id
         WHERE m.person_id IN ({placeholders})
         ORDER BY i.file_path, p.name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok(SearchRow {
                path: row.get(0)?,
                payload: row.get(1)?,
                confidence: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn drop_excluded(rows: Vec<SearchRow>, exclusions: &[PathBuf]) -> Vec<SearchRow> {
    if exclusions.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| !is_excluded(Path::new(&row.path), exclusions))
        .collect()
}
