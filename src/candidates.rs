use std::fmt;

use camino::Utf8PathBuf;

use crate::domain::{ArchivePath, StorageTier, join_segments};
use crate::error::TierError;
use crate::params::{
    DATASET_ARCHIVE_PATH, DATASET_NAME, DATASET_STORAGE_PATH, INPUT_FOLDER_NAME, JobParams,
    SHARED_RESULTS_FOLDERS, TRANSFER_FOLDER_PATH, split_list,
};

/// Directory to search: a filesystem path or a directory inside the remote archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchDir {
    Filesystem(Utf8PathBuf),
    Archive(ArchivePath),
}

impl fmt::Display for SearchDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchDir::Filesystem(path) => write!(f, "{path}"),
            SearchDir::Archive(path) => write!(f, "{path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub tier: StorageTier,
    pub dir: SearchDir,
}

/// Root directories for each parent tier. Missing roots are skipped.
#[derive(Debug, Clone, Default)]
pub struct TierParents {
    pub transfer: Option<Utf8PathBuf>,
    pub dataset_storage: Option<Utf8PathBuf>,
    pub long_term_archive: Option<Utf8PathBuf>,
    pub remote_archive_enabled: bool,
}

impl TierParents {
    pub fn from_params(params: &impl JobParams, remote_archive_enabled: bool) -> Self {
        let non_empty = |name: &str| {
            let value = params.get_param(name);
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| Utf8PathBuf::from(trimmed))
        };
        Self {
            transfer: non_empty(TRANSFER_FOLDER_PATH),
            dataset_storage: non_empty(DATASET_STORAGE_PATH),
            long_term_archive: non_empty(DATASET_ARCHIVE_PATH),
            remote_archive_enabled,
        }
    }
}

/// Job metadata that shapes the candidate directories.
#[derive(Debug, Clone, Default)]
pub struct JobLayout {
    pub dataset: String,
    pub input_dir: String,
    /// In configured order; the builder reverses it.
    pub shared_results_dirs: Vec<String>,
}

impl JobLayout {
    pub fn from_params(params: &impl JobParams) -> Result<Self, TierError> {
        let dataset = params.get_param(DATASET_NAME).trim().to_string();
        if dataset.is_empty() {
            return Err(TierError::MissingParameter(DATASET_NAME.to_string()));
        }
        Ok(Self {
            dataset,
            input_dir: params.get_param(INPUT_FOLDER_NAME).trim().to_string(),
            shared_results_dirs: split_list(&params.get_param(SHARED_RESULTS_FOLDERS)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TierCandidateBuilder {
    parents: TierParents,
}

impl TierCandidateBuilder {
    pub fn new(parents: TierParents) -> Self {
        Self { parents }
    }

    /// Ordered directories to search for a file of `layout`'s dataset.
    ///
    /// Per parent: the input directory, then the shared-results directories with the last
    /// configured one first, then the bare dataset directory. Parents follow tier order and
    /// the archive parents are appended only when `include_archive_tiers` is set and the
    /// tier is usable.
    pub fn build(&self, layout: &JobLayout, include_archive_tiers: bool) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if layout.dataset.trim().is_empty() {
            return candidates;
        }
        let shared: Vec<&str> = layout
            .shared_results_dirs
            .iter()
            .rev()
            .map(String::as_str)
            .filter(|dir| !dir.trim().is_empty())
            .collect();
        let input_dir = layout.input_dir.trim();

        if let Some(root) = &self.parents.transfer {
            for (segment, _) in subdirectories(input_dir, &shared) {
                candidates.push(Candidate {
                    tier: StorageTier::TransferDirectory,
                    dir: SearchDir::Filesystem(join_segments(root, &[&layout.dataset, segment])),
                });
            }
        }

        if let Some(root) = &self.parents.dataset_storage {
            for (segment, is_shared) in subdirectories(input_dir, &shared) {
                let tier = if is_shared {
                    StorageTier::SharedResultsSubdirectory
                } else {
                    StorageTier::DatasetStorage
                };
                candidates.push(Candidate {
                    tier,
                    dir: SearchDir::Filesystem(join_segments(root, &[&layout.dataset, segment])),
                });
            }
        }

        if !include_archive_tiers {
            return candidates;
        }

        if self.parents.remote_archive_enabled {
            for (segment, _) in subdirectories(input_dir, &shared) {
                let subdirectory = (!segment.is_empty()).then(|| segment.to_string());
                candidates.push(Candidate {
                    tier: StorageTier::RemoteArchive,
                    dir: SearchDir::Archive(ArchivePath::new(layout.dataset.clone(), subdirectory)),
                });
            }
        }

        if let Some(root) = &self.parents.long_term_archive {
            for (segment, _) in subdirectories(input_dir, &shared) {
                candidates.push(Candidate {
                    tier: StorageTier::LongTermArchivePath,
                    dir: SearchDir::Filesystem(join_segments(root, &[&layout.dataset, segment])),
                });
            }
        }

        candidates
    }
}

/// Subdirectory segments under `parent/dataset`, flagged when they are shared-results
/// directories. The trailing empty segment stands for the bare dataset directory.
fn subdirectories<'a>(input_dir: &'a str, shared: &[&'a str]) -> Vec<(&'a str, bool)> {
    let mut segments = Vec::with_capacity(shared.len() + 2);
    if !input_dir.is_empty() {
        segments.push((input_dir, false));
    }
    segments.extend(shared.iter().map(|dir| (dir.trim(), true)));
    segments.push(("", false));
    segments
}
