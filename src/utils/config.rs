use std::path::PathBuf;

use thiserror::Error;

use crate::database::modality::ModalitySet;

/// Rejected before the database is opened; mapped to a distinct exit code
/// by the caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("content root {0:?} does not exist")]
    MissingRoot(PathBuf),
    #[error("content root {0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("minimum confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// Validated runtime options for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub exclusions: Vec<PathBuf>,
    pub max_bytes: Option<u64>,
    pub min_confidence: f64,
    pub model: String,
    pub shuffle: bool,
    /// Modalities to index this run. Empty means no indexing work.
    pub index: ModalitySet,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            db_path: PathBuf::from("mediadex.db"),
            exclusions: Vec::new(),
            max_bytes: None,
            min_confidence: 0.3,
            model: "yolov5s".to_string(),
            shuffle: false,
            index: ModalitySet::none(),
        }
    }
}

impl RunConfig {
    /// Fail-fast checks. The content root is only required to exist when
    /// an indexing pass is going to walk it; search and maintenance runs
    /// work against the catalog alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::ConfidenceOutOfRange(self.min_confidence));
        }
        if !self.index.is_empty() {
            if !self.root.exists() {
                return Err(ConfigError::MissingRoot(self.root.clone()));
            }
            if !self.root.is_dir() {
                return Err(ConfigError::NotADirectory(self.root.clone()));
            }
        }
        Ok(())
    }
}
