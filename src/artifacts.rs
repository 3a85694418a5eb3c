//! # Artifact Bundling
//!
//! Produces the output of a build: a compressed archive holding the build
//! log, a timestamp record of the build's start and end, and whatever
//! artifacts the target declared, copied out of the image or build
//! container.
//!
//! Files that are merely nice to have (a log that was never written, a
//! timestamp from an aborted run) are logged as warnings and skipped; the
//! bundle itself failing to write is an error.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::constants::TIMESTAMP_FORMAT;
use crate::error::{Error, Result};

/// Appends a `Started:` line to the timestamp record.
pub fn record_start(timestamp_file: &Path) -> Result<()> {
    append_line(
        timestamp_file,
        &format!("Started:    {}", Local::now().format(TIMESTAMP_FORMAT)),
    )
}

/// Appends a `Completed:` line to the timestamp record.
pub fn record_end(timestamp_file: &Path) -> Result<()> {
    append_line(
        timestamp_file,
        &format!("Completed:  {}", Local::now().format(TIMESTAMP_FORMAT)),
    )
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::options().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Writes the output bundle.
///
/// `artifacts_dir` is the directory of target-declared artifacts already
/// copied to the host; `extras` are individual records (build log,
/// timestamp) appended under the same prefix. A missing extra is a
/// warning, not a failure.
pub fn bundle(
    archive: &Path,
    prefix: &str,
    artifacts_dir: Option<&Path>,
    extras: &[PathBuf],
) -> Result<()> {
    let fail = |reason: String| Error::ArtifactBundleFailed {
        path: archive.to_path_buf(),
        reason,
    };

    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
    }

    let file = File::create(archive).map_err(|e| fail(e.to_string()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    if let Some(dir) = artifacts_dir {
        if dir.is_dir() {
            builder
                .append_dir_all(prefix, dir)
                .map_err(|e| fail(e.to_string()))?;
        } else {
            warn!("artifact directory {} is missing, bundling without it", dir.display());
        }
    }

    for extra in extras {
        if !extra.is_file() {
            warn!("optional file {} is missing, skipping", extra.display());
            continue;
        }
        let name = extra
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "record".to_string());
        builder
            .append_path_with_name(extra, format!("{prefix}/{name}"))
            .map_err(|e| fail(e.to_string()))?;
    }

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| fail(e.to_string()))?;

    info!("artifacts bundled in {}", archive.display());
    Ok(())
}
