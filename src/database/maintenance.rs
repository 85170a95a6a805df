//! Cross-table deletion and the prune pass.
//!
//! Deletion is explicit per table, iterated from the closed descriptor
//! set, rather than relying on foreign-key cascades: the sweep must also
//! clear path-keyed tables that carry no foreign key at all.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::database::modality::{TableKey, MODALITY_TABLES};
use crate::database::retry::execute_with_retry;
use crate::database::writer::{Catalog, CatalogError};

/// Remove every row in every modality table that references `path`,
/// directly or through its artifact id, then the artifact row itself.
///
/// A path with no rows anywhere is a no-op, not an error. The sweep is
/// not transactional: an interruption can leave a partial deletion, and
/// re-running completes it.
pub fn delete_artifact_by_path(catalog: &Catalog, path: &Path) -> Result<(), CatalogError> {
    let path_s = path.to_string_lossy().to_string();
    let image_id: Option<i64> = catalog
        .conn()
        .query_row(
            "SELECT id FROM images WHERE file_path = ?1",
            params![path_s],
            |row| row.get(0),
        )
        .optional()?;

    for table in MODALITY_TABLES {
        match table.key {
            TableKey::FilePath => {
                execute_with_retry(
                    catalog.retry(),
                    catalog.conn(),
                    table.delete_sql,
                    params![path_s],
                )?;
            }
            TableKey::ImageId => {
                if let Some(id) = image_id {
                    execute_with_retry(
                        catalog.retry(),
                        catalog.conn(),
                        table.delete_sql,
                        params![id],
                    )?;
                }
            }
        }
    }

    let removed = execute_with_retry(
        catalog.retry(),
        catalog.conn(),
        "DELETE FROM images WHERE file_path = ?1",
        params![path_s],
    )?;
    if removed > 0 {
        debug!(path = %path.display(), "artifact removed from catalog");
    }
    Ok(())
}

/// Delete every remembered path whose backing file no longer exists on
/// disk. This is what keeps the catalog consistent with a file system
/// that mutates underneath it. Returns the number of paths pruned.
pub fn prune_missing(
    catalog: &Catalog,
    image_index: &HashMap<String, Option<String>>,
    document_paths: &HashSet<String>,
) -> Result<usize, CatalogError> {
    let remembered: HashSet<&String> =
        image_index.keys().chain(document_paths.iter()).collect();

    let mut pruned = 0usize;
    for path_s in remembered {
        let path = Path::new(path_s);
        if !path.exists() {
            delete_artifact_by_path(catalog, path)?;
            info!(path = %path.display(), "pruned vanished artifact");
            pruned += 1;
        }
    }
    Ok(pruned)
}
