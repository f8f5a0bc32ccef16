use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::TierError;

/// Suffix of the pointer file written instead of copying in link-only mode.
pub const STORAGE_PATH_INFO_SUFFIX: &str = "_StoragePathInfo.txt";

/// Copies a located file into the working directory.
pub trait FileCopier {
    fn copy_file(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), TierError>;
}

/// Atomic copy through a temp file, retried a fixed number of times with a holdoff.
#[derive(Debug, Clone)]
pub struct RetryingCopier {
    attempts: u32,
    holdoff: Duration,
}

impl RetryingCopier {
    pub fn new(attempts: u32, holdoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            holdoff,
        }
    }
}

impl Default for RetryingCopier {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl FileCopier for RetryingCopier {
    fn copy_file(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), TierError> {
        let mut attempt = 1;
        loop {
            match copy_file_atomic(source, destination) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.attempts => {
                    tracing::debug!("copy of {source} failed on attempt {attempt}: {err}");
                    thread::sleep(self.holdoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), TierError> {
    let parent = dest
        .parent()
        .ok_or_else(|| TierError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix("tierfetch-file")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| TierError::Filesystem(format!("copy {source}: {err}")))?;
    if dest.as_std_path().exists() {
        fs::remove_file(dest.as_std_path())
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest.as_std_path())
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TierError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
    }
    let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Record where `file_name` lives instead of copying it. Returns the pointer file path.
pub fn write_storage_path_info(
    target_dir: &Utf8Path,
    file_name: &str,
    source: &str,
) -> Result<Utf8PathBuf, TierError> {
    let pointer = target_dir.join(format!("{file_name}{STORAGE_PATH_INFO_SUFFIX}"));
    write_bytes_atomic(&pointer, format!("{source}\n").as_bytes())?;
    Ok(pointer)
}

/// Source path recorded in a pointer file.
pub fn read_storage_path_info(pointer: &Path) -> Result<String, TierError> {
    let content = fs::read_to_string(pointer)
        .map_err(|err| TierError::Filesystem(format!("read {}: {err}", pointer.display())))?;
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TierError::Filesystem(format!("empty pointer file {}", pointer.display())))
}
