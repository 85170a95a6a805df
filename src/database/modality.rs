//! The closed set of modality tables.
//!
//! Generic helpers (the deletion sweep, per-path row counts) iterate this
//! const instead of interpolating table names into SQL at runtime, so the
//! modality set is checkable at compile time and the statements are static.

use serde::Serialize;

/// A searchable modality, as exposed by the search dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchModality {
    Labels,
    Ocr,
    Descriptions,
    Documents,
    Qr,
    People,
}

impl SearchModality {
    pub const ALL: [SearchModality; 6] = [
        SearchModality::Labels,
        SearchModality::Ocr,
        SearchModality::Descriptions,
        SearchModality::Documents,
        SearchModality::Qr,
        SearchModality::People,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchModality::Labels => "labels",
            SearchModality::Ocr => "ocr",
            SearchModality::Descriptions => "descriptions",
            SearchModality::Documents => "documents",
            SearchModality::Qr => "qrcodes",
            SearchModality::People => "people",
        }
    }
}

/// Which modalities a search should fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalitySet {
    pub labels: bool,
    pub ocr: bool,
    pub descriptions: bool,
    pub documents: bool,
    pub qr: bool,
    pub people: bool,
}

impl ModalitySet {
    pub fn all() -> Self {
        Self {
            labels: true,
            ocr: true,
            descriptions: true,
            documents: true,
            qr: true,
            people: true,
        }
    }

    pub fn none() -> Self {
        Self {
            labels: false,
            ocr: false,
            descriptions: false,
            documents: false,
            qr: false,
            people: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }

    pub fn contains(&self, modality: SearchModality) -> bool {
        match modality {
            SearchModality::Labels => self.labels,
            SearchModality::Ocr => self.ocr,
            SearchModality::Descriptions => self.descriptions,
            SearchModality::Documents => self.documents,
            SearchModality::Qr => self.qr,
            SearchModality::People => self.people,
        }
    }
}

/// How a modality table references its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKey {
    /// Keyed directly by `file_path`.
    FilePath,
    /// Keyed by `image_id`, resolved through the `images` row.
    ImageId,
}

/// One modality table with its static delete and count statements.
#[derive(Debug)]
pub struct ModalityTable {
    pub table: &'static str,
    pub key: TableKey,
    pub delete_sql: &'static str,
    pub count_sql: &'static str,
}

/// Every modality table in the catalog except `images` itself, which the
/// deletion manager removes last.
pub const MODALITY_TABLES: &[ModalityTable] = &[
    ModalityTable {
        table: "empty_images",
        key: TableKey::FilePath,
        delete_sql: "DELETE FROM empty_images WHERE file_path = ?1",
        count_sql: "SELECT COUNT(*) FROM empty_images WHERE file_path = ?1",
    },
    ModalityTable {
        table: "ocr_results",
        key: TableKey::FilePath,
        delete_sql: "DELETE FROM ocr_results WHERE file_path = ?1",
        count_sql: "SELECT COUNT(*) FROM ocr_results WHERE file_path = ?1",
    },
    ModalityTable {
        table: "image_description",
        key: TableKey::FilePath,
        delete_sql: "DELETE FROM image_description WHERE file_path = ?1",
        count_sql: "SELECT COUNT(*) FROM image_description WHERE file_path = ?1",
    },
    ModalityTable {
        table: "no_faces",
        key: TableKey::FilePath,
        delete_sql: "DELETE FROM no_faces WHERE file_path = ?1",
        count_sql: "SELECT COUNT(*) FROM no_faces WHERE file_path = ?1",
    },
    ModalityTable {
        table: "no_qrcodes",
        key: TableKey::FilePath,
        delete_sql: "DELETE FROM no_qrcodes WHERE file_path = ?1",
        count_sql: "SELECT COUNT(*) FROM no_qrcodes WHERE file_path = ?1",
    },
    ModalityTable {
        table: "documents",
        key: TableKey::FilePath,
        delete_sql: "DELETE FROM documents WHERE file_path = ?1",
        count_sql: "SELECT COUNT(*) FROM documents WHERE file_path = ?1",
    },
    ModalityTable {
        table: "detections",
        key: TableKey::ImageId,
        delete_sql: "DELETE FROM detections WHERE image_id = ?1",
        count_sql: "SELECT COUNT(*) FROM detections WHERE image_id = ?1",
    },
    ModalityTable {
        table: "image_person_mapping",
        key: TableKey::ImageId,
        delete_sql: "DELETE FROM image_person_mapping WHERE image_id = ?1",
        count_sql: "SELECT COUNT(*) FROM image_person_mapping WHERE image_id = ?1",
    },
    ModalityTable {
        table: "qrcodes",
        key: TableKey::ImageId,
        delete_sql: "DELETE FROM qrcodes WHERE image_id = ?1",
        count_sql: "SELECT COUNT(*) FROM qrcodes WHERE image_id = ?1",
    },
];
