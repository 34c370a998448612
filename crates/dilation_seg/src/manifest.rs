//! Plain-text manifests listing generated artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

pub const RESULT_MANIFEST: &str = "results.txt";
pub const FEATURE_MANIFEST: &str = "feats.txt";

/// Write one path per line, newline-joined without a trailing newline.
/// Any existing manifest is replaced.
pub fn write_manifest(path: &Path, entries: &[PathBuf]) -> Result<()> {
    info!("Writing {}", path.display());
    let text = entries
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, text).map_err(|e| Error::io(path, e))
}
