//! Result package materialization
//!
//! A finished file comes back from the remote service as a zip package. It is
//! unpacked into `<batch dir>/<file stem>/` and the summary artifact inside it
//! (by default `full.md`) is copied next to that directory as
//! `<batch dir>/<file stem>.<ext>`, so the headline result of each input sits
//! directly in the batch directory.

use crate::error::{Error, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

/// Where one result package ended up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Materialized {
    /// Directory holding the unpacked package
    pub extracted_dir: PathBuf,
    /// Copy of the summary artifact, when the package contained one
    pub summary: Option<PathBuf>,
}

/// Unpacks result packages to disk
#[derive(Clone, Debug)]
pub struct ResultMaterializer {
    summary_artifact: String,
}

impl ResultMaterializer {
    /// Materializer that promotes `summary_artifact` (a file name) out of each package
    pub fn new(summary_artifact: impl Into<String>) -> Self {
        Self {
            summary_artifact: summary_artifact.into(),
        }
    }

    /// Unpack `archive` into `dest_dir`, replacing anything already there
    ///
    /// Entries whose path would escape `dest_dir` are skipped.
    ///
    /// # Errors
    /// `CorruptArchive` when the bytes are not a readable zip, `Io` on disk failures.
    pub async fn extract(&self, archive: Vec<u8>, dest_dir: &Path) -> Result<PathBuf> {
        let dest = dest_dir.to_path_buf();
        spawn_blocking(move || extract_archive(&archive, &dest).map(|_| dest))
            .await
            .map_err(|e| Error::Other(format!("extraction task panicked: {}", e)))?
    }

    /// Unpack the package for `display_name` below `batch_dir` and promote its summary
    ///
    /// A missing summary artifact or a failed copy is logged and leaves
    /// [`Materialized::summary`] empty; only extraction failures are errors.
    pub async fn materialize(
        &self,
        archive: Vec<u8>,
        batch_dir: &Path,
        display_name: &str,
    ) -> Result<Materialized> {
        let stem = Path::new(display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_name.to_string());
        let batch_dir = batch_dir.to_path_buf();
        let artifact = self.summary_artifact.clone();

        spawn_blocking(move || materialize_archive(&archive, &batch_dir, &stem, &artifact))
            .await
            .map_err(|e| Error::Other(format!("extraction task panicked: {}", e)))?
    }
}

fn materialize_archive(
    archive: &[u8],
    batch_dir: &Path,
    stem: &str,
    artifact: &str,
) -> Result<Materialized> {
    let extracted_dir = batch_dir.join(stem);
    let files = extract_archive(archive, &extracted_dir)?;

    let found = files
        .iter()
        .find(|path| path.file_name().is_some_and(|name| name == artifact));

    let summary = match found {
        None => {
            warn!(
                archive_dir = %extracted_dir.display(),
                artifact,
                "result package has no summary artifact"
            );
            None
        }
        Some(source) => {
            let target = match Path::new(artifact).extension() {
                Some(ext) => batch_dir.join(format!("{}.{}", stem, ext.to_string_lossy())),
                None => batch_dir.join(stem),
            };
            match std::fs::copy(source, &target) {
                Ok(_) => Some(target),
                Err(e) => {
                    warn!(
                        source = %source.display(),
                        target = %target.display(),
                        error = %e,
                        "failed to copy summary artifact"
                    );
                    None
                }
            }
        }
    };

    info!(
        dir = %extracted_dir.display(),
        files = files.len(),
        summary = summary.is_some(),
        "result package materialized"
    );

    Ok(Materialized {
        extracted_dir,
        summary,
    })
}

/// Unpack `archive` into a fresh `dest_dir`; returns the files written
fn extract_archive(archive: &[u8], dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut package = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| Error::CorruptArchive(format!("failed to open result package: {}", e)))?;

    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)?;
    }
    std::fs::create_dir_all(dest_dir)?;

    let mut written = Vec::new();
    for index in 0..package.len() {
        let mut entry = package
            .by_index(index)
            .map_err(|e| Error::CorruptArchive(format!("failed to read entry {}: {}", index, e)))?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = entry.name(), "skipping entry with unsafe path");
            continue;
        };
        let out_path = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                Error::CorruptArchive(format!("entry '{}' is damaged: {}", entry.name(), e))
            } else {
                Error::Io(e)
            }
        })?;

        debug!(path = %out_path.display(), "extracted");
        written.push(out_path);
    }

    Ok(written)
}
