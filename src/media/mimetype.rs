use anyhow::{Context, Result};
use infer;
use std::path::Path;

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path)
        .context("Failed to read file for mimetype detection")?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok("application/octet-stream".to_string()),
    }
}

/// Content sniff for the image passes. A file can carry an image
/// extension while holding something else entirely (truncated download,
/// renamed archive, zero bytes); those never reach an analyzer.
pub fn is_image_content(path: &Path) -> Result<bool> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    if meta.len() == 0 {
        return Ok(false);
    }
    Ok(detect_mimetype(path)?.starts_with("image/"))
}
