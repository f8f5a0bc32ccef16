use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::archive::{ArchiveClient, ArchiveService, Clock};
use crate::domain::{ArchiveFileId, ArchivedFileRef};
use crate::error::TierError;
use crate::fs_util::{extract_gzip, extract_zip, has_extension};
use crate::report::StatusReporter;

/// How downloaded files are placed under the target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadLayout {
    /// Every file directly in the target directory.
    #[default]
    Flat,
    /// Keep the archive subdirectories of a single dataset.
    SingleDataset,
    /// `target/dataset/subdirectory/file`.
    MultiDataset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadQueueEntry {
    pub file: ArchivedFileRef,
    pub unzip_required: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushResult {
    pub downloaded: Vec<PathBuf>,
    pub extracted: Vec<PathBuf>,
}

/// Archive files waiting to be fetched, at most one entry per file id.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    entries: Vec<DownloadQueueEntry>,
    ids: HashSet<ArchiveFileId>,
    last_extracted: Vec<PathBuf>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already queued.
    pub fn enqueue(&mut self, file: ArchivedFileRef, unzip_required: bool) -> bool {
        if !self.ids.insert(file.file_id) {
            return false;
        }
        self.entries.push(DownloadQueueEntry {
            file,
            unzip_required,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DownloadQueueEntry] {
        &self.entries
    }

    pub fn contains(&self, file_id: ArchiveFileId) -> bool {
        self.ids.contains(&file_id)
    }

    /// Files produced by the most recent extraction.
    pub fn last_extracted_files(&self) -> &[PathBuf] {
        &self.last_extracted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// Download every queued file in order. The first failure stops the pass and is
    /// returned; files already written stay on disk and the queue is left intact.
    pub fn flush<S, R, C>(
        &mut self,
        client: &ArchiveClient<S, R, C>,
        target_dir: &Path,
        layout: DownloadLayout,
        reporter: &dyn StatusReporter,
    ) -> Result<FlushResult, TierError>
    where
        S: ArchiveService,
        R: StatusReporter,
        C: Clock,
    {
        let mut result = FlushResult::default();
        if self.entries.is_empty() {
            return Ok(result);
        }

        reporter.status(format!(
            "downloading {} file(s) from the archive into {}",
            self.entries.len(),
            target_dir.display()
        ));

        for entry in &self.entries {
            let file = &entry.file;
            if file.is_directory {
                reporter.debug(format!(
                    "skipping archive directory {} (archive id {})",
                    file.relative_path, file.file_id
                ));
                continue;
            }
            let destination_dir = destination_dir(target_dir, file, layout)
                .inspect_err(|err| reporter.error(err.to_string()))?;
            fs::create_dir_all(&destination_dir).map_err(|err| {
                TierError::Download(format!("create {}: {err}", destination_dir.display()))
            })?;
            let destination = destination_dir.join(file.file_name());

            client.download(file, &destination).map_err(|err| {
                let message = format!("{} (archive id {}): {err}", file.relative_path, file.file_id);
                reporter.error(format!("download failed: {message}"));
                TierError::Download(message)
            })?;
            reporter.debug(format!("downloaded {}", destination.display()));

            if entry.unzip_required {
                let extracted = unpack(&destination, &destination_dir).inspect_err(|err| {
                    reporter.error(format!("unpacking {} failed: {err}", destination.display()));
                })?;
                if !extracted.is_empty() {
                    reporter.debug(format!(
                        "extracted {} file(s) from {}",
                        extracted.len(),
                        destination.display()
                    ));
                    self.last_extracted = extracted.clone();
                    result.extracted.extend(extracted);
                }
            }
            result.downloaded.push(destination);
        }

        self.clear();
        Ok(result)
    }
}

/// Directory a downloaded file lands in. Every path segment taken from the archive must be
/// a plain name so the file stays under `target_dir`.
fn destination_dir(
    target_dir: &Path,
    file: &ArchivedFileRef,
    layout: DownloadLayout,
) -> Result<PathBuf, TierError> {
    let unsafe_path = || {
        TierError::Download(format!(
            "{} (archive id {}) would be written outside {}",
            file.relative_path,
            file.file_id,
            target_dir.display()
        ))
    };
    if !is_enclosed(file.file_name()) {
        return Err(unsafe_path());
    }

    let subdirectory = match layout {
        DownloadLayout::Flat => None,
        DownloadLayout::SingleDataset | DownloadLayout::MultiDataset => file.subdirectory(),
    };
    if subdirectory.as_deref().is_some_and(|sub| !is_enclosed(sub)) {
        return Err(unsafe_path());
    }

    let mut dir = target_dir.to_path_buf();
    if layout == DownloadLayout::MultiDataset {
        if !is_enclosed(&file.dataset) {
            return Err(unsafe_path());
        }
        dir.push(&file.dataset);
    }
    if let Some(sub) = subdirectory {
        dir.push(sub);
    }
    Ok(dir)
}

fn is_enclosed(segment: &str) -> bool {
    let normalized = segment.replace('\\', "/");
    !normalized.is_empty()
        && Path::new(&normalized)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Extract `.zip` or `.gz` files in place; other files are left alone.
fn unpack(path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, TierError> {
    if has_extension(path, "zip") {
        return extract_zip(path, target_dir);
    }
    if has_extension(path, "gz") {
        return extract_gzip(path, target_dir).map(|file| vec![file]);
    }
    Ok(Vec::new())
}
