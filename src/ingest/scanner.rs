//! Incremental scan planning over a content root.
//!
//! The walk itself is format-agnostic: one planner serves every modality,
//! and each pass layers its own "already done" predicate on top of the
//! candidate set (the planner only subtracts the prefetched known-paths
//! index it is handed).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Recognized image formats (extension allowlist, case-insensitive).
pub const IMAGE_FORMATS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff",
];

/// Recognized document formats.
pub const DOCUMENT_FORMATS: &[&str] = &["pdf", "txt", "md", "docx"];

/// Plans one modality pass over the content root.
#[derive(Debug, Clone)]
pub struct ScanPlanner {
    root: PathBuf,
    exclusions: Vec<PathBuf>,
    formats: &'static [&'static str],
    max_bytes: Option<u64>,
    shuffle: bool,
}

impl ScanPlanner {
    pub fn new(
        root: &Path,
        exclusions: &[PathBuf],
        formats: &'static [&'static str],
        max_bytes: Option<u64>,
        shuffle: bool,
    ) -> Self {
        Self {
            root: absolutize(root),
            exclusions: exclusions.iter().map(|p| absolutize(p)).collect(),
            formats,
            max_bytes,
            shuffle,
        }
    }

    /// Candidate artifact paths: recognized format, within the size
    /// ceiling, not under an excluded prefix, not already in `known`.
    ///
    /// Paths come back absolute, in traversal order; `shuffle` randomizes
    /// the order so an interrupted long batch does not keep favoring
    /// alphabetically-early files.
    pub fn candidates(&self, known: &HashSet<String>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(%err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !has_allowed_extension(path, self.formats) {
                continue;
            }
            if is_excluded(path, &self.exclusions) {
                continue;
            }
            if let Some(limit) = self.max_bytes {
                match entry.metadata() {
                    Ok(meta) if meta.len() > limit => continue,
                    Ok(_) => {}
                    Err(_) => continue,
                }
            }
            if known.contains(path.to_string_lossy().as_ref()) {
                continue;
            }
            out.push(path.to_path_buf());
        }

        if self.shuffle {
            out.shuffle(&mut rand::thread_rng());
        }
        out
    }
}

/// Component-wise prefix check against the configured exclusion roots.
pub fn is_excluded(path: &Path, exclusions: &[PathBuf]) -> bool {
    exclusions.iter().any(|prefix| path.starts_with(prefix))
}

/// Resolve to absolute form without requiring the path to exist.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') && name.len() > 1 && entry.depth() > 0)
        .unwrap_or(false)
}

fn has_allowed_extension(path: &Path, formats: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| formats.iter().any(|f| ext.eq_ignore_ascii_case(f)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn filters_format_exclusion_and_known() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("excluded")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        touch(&root.join("a.jpg"));
        touch(&root.join("b.PNG"));
        touch(&root.join("notes.txt"));
        touch(&root.join("excluded/c.jpg"));
        touch(&root.join(".cache/d.jpg"));

        let known: HashSet<String> =
            [root.join("b.PNG").to_string_lossy().to_string()].into();
        let planner = ScanPlanner::new(
            root,
            &[root.join("excluded")],
            IMAGE_FORMATS,
            None,
            false,
        );
        let found = planner.candidates(&known);
        assert_eq!(found, vec![root.join("a.jpg")]);
    }

    #[test]
    fn size_ceiling_skips_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("small.jpg"), vec![0u8; 10]).unwrap();
        fs::write(root.join("large.jpg"), vec![0u8; 1000]).unwrap();

        let planner = ScanPlanner::new(root, &[], IMAGE_FORMATS, Some(100), false);
        let found = planner.candidates(&HashSet::new());
        assert_eq!(found, vec![root.join("small.jpg")]);
    }

    #[test]
    fn document_formats_walk_the_same_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("paper.pdf"));
        touch(&root.join("photo.jpg"));

        let planner = ScanPlanner::new(root, &[], DOCUMENT_FORMATS, None, false);
        let found = planner.candidates(&HashSet::new());
        assert_eq!(found, vec![root.join("paper.pdf")]);
    }

    #[test]
    fn shuffle_preserves_the_candidate_set() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for i in 0..20 {
            touch(&root.join(format!("img{i:02}.jpg")));
        }

        let plain = ScanPlanner::new(root, &[], IMAGE_FORMATS, None, false);
        let shuffled = ScanPlanner::new(root, &[], IMAGE_FORMATS, None, true);
        let mut a = plain.candidates(&HashSet::new());
        let mut b = shuffled.candidates(&HashSet::new());
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
