//! mediadex: a local, file-system-scoped content catalog.
//!
//! A SQLite-backed index of images and documents enriched by pluggable
//! analyzers (object labels, OCR text, captions, face identities, barcode
//! payloads, full-text documents), with incremental re-indexing, a
//! lock-contention-tolerant write path, cross-table deletion, and
//! multi-modal keyword search.

pub mod analyze;
pub mod database;
pub mod ingest;
pub mod media;
pub mod search;
pub mod utils;

pub use analyze::{AnalyzerRegistry, Verdict};
pub use database::maintenance::{delete_artifact_by_path, prune_missing};
pub use database::modality::{ModalitySet, SearchModality};
pub use database::retry::RetryPolicy;
pub use database::schema::{open_catalog, open_memory};
pub use database::writer::{Catalog, CatalogError, Detection};
pub use ingest::pipeline::index_content_root;
pub use search::dispatch::{dispatch, SearchReport, SearchRequest};
pub use utils::config::RunConfig;
