#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::metadata::ModuleMetadata;

pub const MANIFEST_FILE: &str = "module.json";
pub const ARCHIVE_FILE: &str = "module.zip";

/// Writes `module.json` and `module.zip` into `out_dir`.
///
/// The manifest is only staged on disk while the archive is built and is
/// removed afterwards. A partially written archive is removed on failure.
pub fn write_package(
    out_dir: &Path,
    module_path: &Path,
    metadata: &ModuleMetadata,
) -> Result<PathBuf> {
    let manifest_bytes = metadata.to_canonical_json()?;

    let manifest_path = out_dir.join(MANIFEST_FILE);
    let _manifest = write_manifest(&manifest_path, &manifest_bytes)?;
    debug!(path = %manifest_path.display(), len = manifest_bytes.len(), "wrote manifest");

    let archive_path = out_dir.join(ARCHIVE_FILE);
    write_archive(&archive_path, module_path, &metadata.module_file, &manifest_path)?;

    info!(path = %archive_path.display(), module = %metadata.module_file, "wrote archive");
    Ok(archive_path)
}

fn write_archive(
    archive_path: &Path,
    module_path: &Path,
    module_entry: &str,
    manifest_path: &Path,
) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    // Declared before the writer so the writer is released first on error.
    let mut staged = StagedFile::new(archive_path);
    let mut zip = ZipWriter::new(file);

    add_file(&mut zip, module_path, module_entry)?;
    add_file(&mut zip, manifest_path, MANIFEST_FILE)?;

    zip.finish()
        .with_context(|| format!("failed to finalize {}", archive_path.display()))?;
    staged.keep();
    Ok(())
}

/// Writes the manifest and returns a guard that removes it when dropped.
///
/// The guard exists only once this run has created the file.
fn write_manifest(path: &Path, bytes: &[u8]) -> Result<StagedFile> {
    let mut file =
        File::create(path).with_context(|| format!("failed to write {}", path.display()))?;
    let staged = StagedFile::new(path);
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(staged)
}

fn add_file<W: Write + Seek>(zip: &mut ZipWriter<W>, source: &Path, entry: &str) -> Result<()> {
    let mut input =
        File::open(source).with_context(|| format!("failed to open {}", source.display()))?;

    let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    if let Some(mode) = unix_mode(&input) {
        options = options.unix_permissions(mode);
    }

    zip.start_file(entry, options)
        .with_context(|| format!("failed to start archive entry {entry}"))?;
    io::copy(&mut input, zip)
        .with_context(|| format!("failed to archive {}", source.display()))?;
    Ok(())
}

#[cfg(unix)]
fn unix_mode(file: &File) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    file.metadata().ok().map(|meta| meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn unix_mode(_file: &File) -> Option<u32> {
    None
}

/// Removes `path` on drop unless [`StagedFile::keep`] was called.
///
/// Only construct one after this run has created the file at `path`.
struct StagedFile {
    path: PathBuf,
    keep: bool,
}

impl StagedFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staged file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove staged file")
            }
        }
    }
}
