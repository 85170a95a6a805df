//! Per-modality indexing passes.
//!
//! Each pass prefetches its "already done" set in one query, plans
//! candidates, and walks them behind a progress bar. Analyzer failures and
//! missing-file races are logged and skipped so a batch survives partial
//! failure; storage errors other than lock contention abort the pass.

use std::collections::HashSet;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::analyze::{
    AnalyzerRegistry, BarcodeReader, Captioner, DocumentConverter, FaceMatcher, ObjectDetector,
    TextRecognizer, Verdict,
};
use crate::database::lookup;
use crate::database::writer::Catalog;
use crate::ingest::hasher;
use crate::ingest::scanner::{ScanPlanner, DOCUMENT_FORMATS, IMAGE_FORMATS};
use crate::media::mimetype;
use crate::utils::config::RunConfig;

/// Outcome counters for one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Run every requested pass that has an analyzer wired. A requested pass
/// without an analyzer is reported and skipped rather than failing the run.
pub fn index_content_root(
    catalog: &Catalog,
    config: &RunConfig,
    registry: &AnalyzerRegistry,
) -> Result<()> {
    let images = ScanPlanner::new(
        &config.root,
        &config.exclusions,
        IMAGE_FORMATS,
        config.max_bytes,
        config.shuffle,
    );

    if config.index.labels {
        match &registry.detector {
            Some(detector) => {
                let summary = run_detection_pass(catalog, &images, detector.as_ref())?;
                log_pass("detection", summary);
            }
            None => warn!(
                model = %config.model,
                "object detection requested but no detector is wired"
            ),
        }
    }
    if config.index.ocr {
        match &registry.recognizer {
            Some(recognizer) => {
                let summary = run_ocr_pass(catalog, &images, recognizer.as_ref())?;
                log_pass("ocr", summary);
            }
            None => warn!("ocr requested but no text recognizer is wired"),
        }
    }
    if config.index.descriptions {
        match &registry.captioner {
            Some(captioner) => {
                let summary = run_caption_pass(catalog, &images, captioner.as_ref())?;
                log_pass("caption", summary);
            }
            None => warn!("captions requested but no captioner is wired"),
        }
    }
    if config.index.people {
        match &registry.face_matcher {
            Some(matcher) => {
                let summary = run_face_pass(catalog, &images, matcher.as_ref())?;
                log_pass("faces", summary);
            }
            None => warn!("face recognition requested but no face matcher is wired"),
        }
    }
    if config.index.qr {
        match &registry.barcode_reader {
            Some(reader) => {
                let summary = run_qr_pass(catalog, &images, reader.as_ref())?;
                log_pass("qrcodes", summary);
            }
            None => warn!("barcode scanning requested but no barcode reader is wired"),
        }
    }
    if config.index.documents {
        match &registry.document_converter {
            Some(converter) => {
                let documents = ScanPlanner::new(
                    &config.root,
                    &config.exclusions,
                    DOCUMENT_FORMATS,
                    config.max_bytes,
                    config.shuffle,
                );
                let summary = run_document_pass(catalog, &documents, converter.as_ref())?;
                log_pass("documents", summary);
            }
            None => warn!("document indexing requested but no converter is wired"),
        }
    }
    Ok(())
}

/// Object detection. Freshness differs from the other passes: a path is
/// done only while the stored modification time still matches the file,
/// so a touched file is re-analyzed. An analyzed-but-empty marker is
/// honored while the content hash is unchanged.
pub fn run_detection_pass(
    catalog: &Catalog,
    planner: &ScanPlanner,
    detector: &dyn ObjectDetector,
) -> Result<PassSummary> {
    let model = detector.model_id();
    let detected = lookup::detection_index(catalog.conn(), model)?;
    let empties = lookup::empty_image_index(catalog.conn())?;

    let candidates = planner.candidates(&HashSet::new());
    let bar = pass_bar(candidates.len() as u64, "detect");
    let mut summary = PassSummary::default();

    for path in candidates {
        bar.inc(1);
        let path_s = path.to_string_lossy().to_string();

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), %err, "file vanished before analysis");
                summary.skipped += 1;
                continue;
            }
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        if detected.get(&path_s) == Some(&mtime) {
            summary.skipped += 1;
            continue;
        }

        let mut current_hash = None;
        if let Some(stored) = empties.get(&path_s) {
            match hasher::hash_file(&path) {
                Ok(hash) => {
                    if stored.as_deref() == Some(hash.as_str()) {
                        summary.skipped += 1;
                        continue;
                    }
                    current_hash = Some(hash);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "could not hash for marker check");
                    summary.skipped += 1;
                    continue;
                }
            }
        }

        if !passes_image_gate(&path, &mut summary) {
            continue;
        }

        match detector.detect(&path) {
            Ok(Verdict::Found(detections)) if !detections.is_empty() => {
                let (image_id, _) = catalog.record_image(&path)?;
                catalog.record_detections(image_id, model, &detections)?;
                summary.analyzed += 1;
            }
            Ok(_) => {
                let hash = match current_hash {
                    Some(hash) => hash,
                    None => match hasher::hash_file(&path) {
                        Ok(hash) => hash,
                        Err(err) => {
                            warn!(path = %path.display(), %err, "could not hash empty result");
                            summary.failed += 1;
                            continue;
                        }
                    },
                };
                catalog.record_empty_image(&path, &hash)?;
                summary.analyzed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "detection failed");
                summary.failed += 1;
            }
        }
    }
    bar.finish_and_clear();
    Ok(summary)
}

pub fn run_ocr_pass(
    catalog: &Catalog,
    planner: &ScanPlanner,
    recognizer: &dyn TextRecognizer,
) -> Result<PassSummary> {
    let done = lookup::ocr_paths(catalog.conn())?;
    let candidates = planner.candidates(&done);
    let bar = pass_bar(candidates.len() as u64, "ocr");
    let mut summary = PassSummary::default();

    for path in candidates {
        bar.inc(1);
        if !passes_image_gate(&path, &mut summary) {
            continue;
        }
        match recognizer.recognize(&path) {
            Ok(Verdict::Found(text)) => {
                catalog.record_ocr_text(&path, &text)?;
                summary.analyzed += 1;
            }
            Ok(Verdict::Nothing) => {
                // Ran and found no text; remembered as an empty result.
                catalog.record_ocr_text(&path, "")?;
                summary.analyzed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "ocr failed");
                summary.failed += 1;
            }
        }
    }
    bar.finish_and_clear();
    Ok(summary)
}

pub fn run_caption_pass(
    catalog: &Catalog,
    planner: &ScanPlanner,
    captioner: &dyn Captioner,
) -> Result<PassSummary> {
    let done = lookup::description_paths(catalog.conn())?;
    let candidates = planner.candidates(&done);
    let bar = pass_bar(candidates.len() as u64, "caption");
    let mut summary = PassSummary::default();

    for path in candidates {
        bar.inc(1);
        if !passes_image_gate(&path, &mut summary) {
            continue;
        }
        match captioner.describe(&path) {
            Ok(Verdict::Found(text)) => {
                catalog.record_description(&path, &text)?;
                summary.analyzed += 1;
            }
            Ok(Verdict::Nothing) => {
                catalog.record_description(&path, "")?;
                summary.analyzed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "captioning failed");
                summary.failed += 1;
            }
        }
    }
    bar.finish_and_clear();
    Ok(summary)
}

pub fn run_face_pass(
    catalog: &Catalog,
    planner: &ScanPlanner,
    matcher: &dyn FaceMatcher,
) -> Result<PassSummary> {
    let done = lookup::face_done_paths(catalog.conn())?;
    let candidates = planner.candidates(&done);
    let bar = pass_bar(candidates.len() as u64, "faces");
    let mut summary = PassSummary::default();

    for path in candidates {
        bar.inc(1);
        if !passes_image_gate(&path, &mut summary) {
            continue;
        }
        match matcher.identify(&path) {
            Ok(Verdict::Found(names)) if !names.is_empty() => {
                catalog.record_person_links(&path, &names)?;
                summary.analyzed += 1;
            }
            Ok(_) => {
                catalog.record_no_faces(&path)?;
                summary.analyzed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "face recognition failed");
                summary.failed += 1;
            }
        }
    }
    bar.finish_and_clear();
    Ok(summary)
}

pub fn run_qr_pass(
    catalog: &Catalog,
    planner: &ScanPlanner,
    reader: &dyn BarcodeReader,
) -> Result<PassSummary> {
    let done = lookup::qr_done_paths(catalog.conn())?;
    let candidates = planner.candidates(&done);
    let bar = pass_bar(candidates.len() as u64, "qrcodes");
    let mut summary = PassSummary::default();

    for path in candidates {
        bar.inc(1);
        if !passes_image_gate(&path, &mut summary) {
            continue;
        }
        match reader.decode(&path) {
            Ok(Verdict::Found(payloads)) if !payloads.is_empty() => {
                catalog.record_qr_payloads(&path, &payloads)?;
                summary.analyzed += 1;
            }
            Ok(_) => {
                catalog.record_no_qr(&path)?;
                summary.analyzed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "barcode scan failed");
                summary.failed += 1;
            }
        }
    }
    bar.finish_and_clear();
    Ok(summary)
}

/// Documents skip the image gate; the presence set is prefetched so the
/// conversion (the expensive step) is never attempted for an indexed path.
pub fn run_document_pass(
    catalog: &Catalog,
    planner: &ScanPlanner,
    converter: &dyn DocumentConverter,
) -> Result<PassSummary> {
    let done = lookup::document_paths(catalog.conn())?;
    let candidates = planner.candidates(&done);
    let bar = pass_bar(candidates.len() as u64, "documents");
    let mut summary = PassSummary::default();

    for path in candidates {
        bar.inc(1);
        if !path.exists() {
            warn!(path = %path.display(), "file vanished before conversion");
            summary.skipped += 1;
            continue;
        }
        match converter.extract(&path) {
            Ok(Verdict::Found(text)) => {
                catalog.record_document(&path, &text)?;
                summary.analyzed += 1;
            }
            Ok(Verdict::Nothing) => {
                catalog.record_document(&path, "")?;
                summary.analyzed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "document conversion failed");
                summary.failed += 1;
            }
        }
    }
    bar.finish_and_clear();
    Ok(summary)
}

/// Missing files and files whose bytes are not image content are skipped
/// with a warning; they never reach an analyzer and no marker is written,
/// so they stay eligible if the content is fixed later.
fn passes_image_gate(path: &Path, summary: &mut PassSummary) -> bool {
    match mimetype::is_image_content(path) {
        Ok(true) => true,
        Ok(false) => {
            warn!(path = %path.display(), "content is not an image, skipping");
            summary.skipped += 1;
            false
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "could not read file, skipping");
            summary.skipped += 1;
            false
        }
    }
}

fn pass_bar(len: u64, name: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{msg:>9} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(name);
    bar
}

fn log_pass(pass: &str, summary: PassSummary) {
    info!(
        pass,
        analyzed = summary.analyzed,
        skipped = summary.skipped,
        failed = summary.failed,
        "pass complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::PlainTextConverter;
    use crate::database::retry::RetryPolicy;
    use crate::database::schema::open_memory;
    use crate::database::writer::Detection;
    use std::cell::Cell;
    use std::fs;

    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];

    struct FixedDetector {
        labels: Vec<Detection>,
        calls: Cell<usize>,
    }

    impl FixedDetector {
        fn finding(labels: Vec<Detection>) -> Self {
            Self {
                labels,
                calls: Cell::new(0),
            }
        }
    }

    impl ObjectDetector for FixedDetector {
        fn model_id(&self) -> &str {
            "yolov5s"
        }
        fn detect(&self, _path: &Path) -> Result<Verdict<Vec<Detection>>> {
            self.calls.set(self.calls.get() + 1);
            if self.labels.is_empty() {
                Ok(Verdict::Nothing)
            } else {
                Ok(Verdict::Found(self.labels.clone()))
            }
        }
    }

    struct FixedRecognizer(&'static str);

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, _path: &Path) -> Result<Verdict<String>> {
            Ok(Verdict::Found(self.0.to_string()))
        }
    }

    struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn recognize(&self, _path: &Path) -> Result<Verdict<String>> {
            anyhow::bail!("recognizer crashed")
        }
    }

    struct NobodyMatcher;

    impl FaceMatcher for NobodyMatcher {
        fn identify(&self, _path: &Path) -> Result<Verdict<Vec<String>>> {
            Ok(Verdict::Nothing)
        }
    }

    struct SilentReader;

    impl BarcodeReader for SilentReader {
        fn decode(&self, _path: &Path) -> Result<Verdict<Vec<String>>> {
            Ok(Verdict::Found(Vec::new()))
        }
    }

    fn test_catalog() -> Catalog {
        Catalog::new(open_memory().unwrap(), RetryPolicy::default())
    }

    fn count(catalog: &Catalog, sql: &str) -> i64 {
        catalog.conn().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn detection_pass_records_then_skips_fresh_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cat.jpg"), JPEG_MAGIC).unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], IMAGE_FORMATS, None, false);
        let detector = FixedDetector::finding(vec![Detection {
            label: "cat".into(),
            confidence: 0.91,
        }]);

        let first = run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(first.analyzed, 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM detections"), 1);

        let second = run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(second.analyzed, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(detector.calls.get(), 1);
    }

    #[test]
    fn content_change_behind_unchanged_mtime_is_not_redetected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cat.jpg");
        fs::write(&file, JPEG_MAGIC).unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], IMAGE_FORMATS, None, false);
        let detector = FixedDetector::finding(vec![Detection {
            label: "cat".into(),
            confidence: 0.91,
        }]);

        run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(detector.calls.get(), 1);

        // Rewrite the bytes, then pin the modification time back to the
        // stored value. Freshness keys on mtime alone, so the stale
        // detections are kept.
        let stamp = fs::metadata(&file).unwrap().modified().unwrap();
        let mut altered = JPEG_MAGIC.to_vec();
        altered.extend_from_slice(b"v2");
        fs::write(&file, altered).unwrap();
        fs::OpenOptions::new()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(stamp)
            .unwrap();

        let second = run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(detector.calls.get(), 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM detections"), 1);
    }

    #[test]
    fn empty_verdict_marker_holds_until_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blank.jpg");
        fs::write(&file, JPEG_MAGIC).unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], IMAGE_FORMATS, None, false);
        let detector = FixedDetector::finding(Vec::new());

        run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM empty_images"), 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM images"), 0);

        // Unchanged content: the marker suppresses a second run.
        run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(detector.calls.get(), 1);

        // Changed content re-triggers and refreshes the marker hash.
        let mut altered = JPEG_MAGIC.to_vec();
        altered.extend_from_slice(b"v2");
        fs::write(&file, altered).unwrap();
        run_detection_pass(&catalog, &planner, &detector).unwrap();
        assert_eq!(detector.calls.get(), 2);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM empty_images"), 1);
    }

    #[test]
    fn analyzer_failure_leaves_artifact_eligible_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sign.jpg"), JPEG_MAGIC).unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], IMAGE_FORMATS, None, false);

        let failing = run_ocr_pass(&catalog, &planner, &FailingRecognizer).unwrap();
        assert_eq!(failing.failed, 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM ocr_results"), 0);

        let fixed = run_ocr_pass(&catalog, &planner, &FixedRecognizer("stop")).unwrap();
        assert_eq!(fixed.analyzed, 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM ocr_results"), 1);
    }

    #[test]
    fn non_image_bytes_never_reach_the_analyzer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fake.jpg"), b"plain prose").unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], IMAGE_FORMATS, None, false);

        let summary = run_ocr_pass(&catalog, &planner, &FixedRecognizer("x")).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.analyzed, 0);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM ocr_results"), 0);
    }

    #[test]
    fn nothing_verdicts_write_done_markers_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("crowd.jpg"), JPEG_MAGIC).unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], IMAGE_FORMATS, None, false);

        run_face_pass(&catalog, &planner, &NobodyMatcher).unwrap();
        run_qr_pass(&catalog, &planner, &SilentReader).unwrap();
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM no_faces"), 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM no_qrcodes"), 1);

        // Done sets empty both candidate lists on the second run.
        let faces = run_face_pass(&catalog, &planner, &NobodyMatcher).unwrap();
        let qr = run_qr_pass(&catalog, &planner, &SilentReader).unwrap();
        assert_eq!(faces, PassSummary::default());
        assert_eq!(qr, PassSummary::default());
    }

    #[test]
    fn document_pass_indexes_plaintext_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "orchid care schedule").unwrap();

        let catalog = test_catalog();
        let planner = ScanPlanner::new(dir.path(), &[], DOCUMENT_FORMATS, None, false);

        let first = run_document_pass(&catalog, &planner, &PlainTextConverter).unwrap();
        assert_eq!(first.analyzed, 1);
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM documents"), 1);

        let second = run_document_pass(&catalog, &planner, &PlainTextConverter).unwrap();
        assert_eq!(second, PassSummary::default());
        assert_eq!(count(&catalog, "SELECT COUNT(*) FROM documents"), 1);
    }
}
