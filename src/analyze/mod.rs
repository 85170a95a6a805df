//! Analyzer contracts.
//!
//! Analyzers are external collaborators: the catalog only cares about the
//! three-way outcome of a run. `Ok(Found(_))` carries facts to record,
//! `Ok(Nothing)` means the analyzer ran and affirmatively found nothing
//! (persisted as a done-empty marker so the artifact is not re-analyzed),
//! and `Err(_)` means the run failed. Failures are never persisted; the
//! artifact stays eligible for retry on the next pass.

use std::path::Path;

use anyhow::Result;

use crate::database::writer::Detection;

/// Outcome of a successful analyzer run.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Found(T),
    Nothing,
}

impl<T> Verdict<T> {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Verdict::Nothing)
    }
}

/// Object detection over one image file.
pub trait ObjectDetector {
    /// Identifier stored alongside each detection row; freshness checks
    /// are scoped to this model.
    fn model_id(&self) -> &str;

    fn detect(&self, path: &Path) -> Result<Verdict<Vec<Detection>>>;
}

/// Optical character recognition over one image file.
pub trait TextRecognizer {
    fn recognize(&self, path: &Path) -> Result<Verdict<String>>;
}

/// Natural-language caption generation over one image file.
pub trait Captioner {
    fn describe(&self, path: &Path) -> Result<Verdict<String>>;
}

/// Face identification. `Found` carries the recognized person names.
pub trait FaceMatcher {
    fn identify(&self, path: &Path) -> Result<Verdict<Vec<String>>>;
}

/// Barcode/QR decoding. `Found` carries the decoded payload strings.
pub trait BarcodeReader {
    fn decode(&self, path: &Path) -> Result<Verdict<Vec<String>>>;
}

/// Document-to-text conversion for the full-text store.
pub trait DocumentConverter {
    fn extract(&self, path: &Path) -> Result<Verdict<String>>;
}

/// Analyzer slots, assembled once at startup and passed into the indexing
/// passes. A pass whose slot is `None` is skipped with a warning rather
/// than failing the run.
#[derive(Default)]
pub struct AnalyzerRegistry {
    pub detector: Option<Box<dyn ObjectDetector>>,
    pub recognizer: Option<Box<dyn TextRecognizer>>,
    pub captioner: Option<Box<dyn Captioner>>,
    pub face_matcher: Option<Box<dyn FaceMatcher>>,
    pub barcode_reader: Option<Box<dyn BarcodeReader>>,
    pub document_converter: Option<Box<dyn DocumentConverter>>,
}

/// Built-in converter for formats that are already plain text. Binary
/// document formats (pdf, docx) need an external converter wired into the
/// registry; this one reports `Nothing` for them so they are recorded as
/// converted-but-empty instead of erroring every run.
pub struct PlainTextConverter;

impl DocumentConverter for PlainTextConverter {
    fn extract(&self, path: &Path) -> Result<Verdict<String>> {
        let plain = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md")
        );
        if !plain {
            return Ok(Verdict::Nothing);
        }
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            Ok(Verdict::Nothing)
        } else {
            Ok(Verdict::Found(text))
        }
    }
}
