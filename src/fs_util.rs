use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::TierError;

/// Extract every entry of `zip_path` into `target_dir`; returns the files written.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, TierError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| TierError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| TierError::Filesystem(err.to_string()))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(TierError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| TierError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| TierError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| TierError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| TierError::Filesystem(err.to_string()))?;
        extracted.push(entry_path);
    }
    Ok(extracted)
}

/// Decompress a single-stream `.gz` file next to itself, dropping the `.gz` suffix.
pub fn extract_gzip(gz_path: &Path, target_dir: &Path) -> Result<PathBuf, TierError> {
    let stem = gz_path
        .file_stem()
        .ok_or_else(|| TierError::Filesystem(format!("invalid gzip name {}", gz_path.display())))?;
    let output_path = target_dir.join(stem);
    let file = fs::File::open(gz_path)
        .map_err(|err| TierError::Filesystem(format!("open gzip {}: {err}", gz_path.display())))?;
    let mut decoder = GzDecoder::new(io::BufReader::new(file));
    let mut outfile =
        fs::File::create(&output_path).map_err(|err| TierError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut outfile)
        .map_err(|err| TierError::Filesystem(format!("gunzip {}: {err}", gz_path.display())))?;
    Ok(output_path)
}

pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|value| value.eq_ignore_ascii_case(ext))
}

/// Delete a file if present. A missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, TierError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(TierError::Filesystem(format!(
            "delete {}: {err}",
            path.display()
        ))),
    }
}

/// First unused backup name: `name.old`, then `name.old1`, `name.old2`, ...
pub fn next_backup_path(path: &Path) -> PathBuf {
    let base = path.as_os_str().to_string_lossy().into_owned();
    let first = PathBuf::from(format!("{base}.old"));
    if !first.exists() {
        return first;
    }
    let mut index = 1u32;
    loop {
        let candidate = PathBuf::from(format!("{base}.old{index}"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Move `original` to a backup, move `replacement` into its place, and optionally drop the
/// backup. Returns the backup path when it was kept.
pub fn replace_with_backup(
    original: &Path,
    replacement: &Path,
    keep_backup: bool,
) -> Result<Option<PathBuf>, TierError> {
    let backup = next_backup_path(original);
    fs::rename(original, &backup).map_err(|err| {
        TierError::Filesystem(format!("rename {} to backup: {err}", original.display()))
    })?;
    if let Err(err) = fs::rename(replacement, original) {
        let mut message = format!("move {} into place: {err}", replacement.display());
        if let Err(restore_err) = fs::rename(&backup, original) {
            message.push_str(&format!(
                "; restoring {} from {} failed: {restore_err}",
                original.display(),
                backup.display()
            ));
        }
        return Err(TierError::Filesystem(message));
    }
    if keep_backup {
        return Ok(Some(backup));
    }
    remove_file_if_exists(&backup)?;
    Ok(None)
}
