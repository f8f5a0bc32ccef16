use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::archive::{ArchiveService, Clock, SystemClock};
use crate::condenser::{CondenseOutcome, LargeTextCondenser, validate_cdta};
use crate::config::ResolvedConfig;
use crate::domain::{ArchiveFileId, FileLocation, Location, StorageTier};
use crate::download::{DownloadLayout, DownloadQueue, FlushResult};
use crate::error::TierError;
use crate::fs_util::remove_file_if_exists;
use crate::hashcheck::{CacheValidator, FileHasher, HashAlgorithm, StreamingHasher, hashcheck_path};
use crate::params::JobParams;
use crate::report::StatusReporter;
use crate::resolver::Resolver;
use crate::store::{FileCopier, STORAGE_PATH_INFO_SUFFIX, write_storage_path_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieveMode {
    #[default]
    Copy,
    /// Leave the file where it is and write a pointer file naming its location.
    LinkOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrieveOptions {
    pub mode: RetrieveMode,
    pub search_archive: bool,
    pub unzip: bool,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            mode: RetrieveMode::Copy,
            search_archive: true,
            unzip: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Retrieved {
    Copied {
        path: Utf8PathBuf,
        tier: StorageTier,
    },
    Linked {
        pointer: Utf8PathBuf,
        source: String,
        tier: StorageTier,
    },
    /// Waiting in the download queue until the next flush.
    Queued { file_id: ArchiveFileId },
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub max_attempts: u32,
    pub hash_algorithm: HashAlgorithm,
    pub recheck_interval_days: u32,
    pub condense_threshold_bytes: u64,
    pub keep_condenser_backup: bool,
}

impl From<&ResolvedConfig> for RetrievalSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            hash_algorithm: config.hash_algorithm,
            recheck_interval_days: config.recheck_interval_days,
            condense_threshold_bytes: config.condense_threshold_bytes,
            keep_condenser_backup: config.keep_condenser_backup,
        }
    }
}

/// Brings a job's input files into its working directory.
pub struct Retriever<'p, P, S, R, F, C = SystemClock, H = StreamingHasher>
where
    P: JobParams,
    S: ArchiveService,
    R: StatusReporter,
    F: FileCopier,
    C: Clock,
    H: FileHasher,
{
    resolver: Resolver<S, R, C>,
    queue: DownloadQueue,
    copier: F,
    validator: CacheValidator<H>,
    params: &'p P,
    reporter: R,
    work_dir: Utf8PathBuf,
    settings: RetrievalSettings,
}

impl<'p, P, S, R, F, C, H> Retriever<'p, P, S, R, F, C, H>
where
    P: JobParams,
    S: ArchiveService,
    R: StatusReporter,
    F: FileCopier,
    C: Clock,
    H: FileHasher,
{
    pub fn new(
        resolver: Resolver<S, R, C>,
        copier: F,
        validator: CacheValidator<H>,
        params: &'p P,
        reporter: R,
        work_dir: Utf8PathBuf,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            resolver,
            queue: DownloadQueue::new(),
            copier,
            validator,
            params,
            reporter,
            work_dir,
            settings,
        }
    }

    pub fn resolver_mut(&mut self) -> &mut Resolver<S, R, C> {
        &mut self.resolver
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// Locate `file_name` and bring it into the working directory: copy it, write a pointer
    /// to it, or queue it for download when only the archive has it.
    pub fn retrieve_file(
        &mut self,
        file_name: &str,
        options: RetrieveOptions,
    ) -> Result<Retrieved, TierError> {
        let location = self
            .resolver
            .find(file_name, options.search_archive, self.settings.max_attempts)
            .ok_or_else(|| TierError::NotFound(file_name.to_string()))?;
        self.retrieve_from(&location, options)
    }

    pub fn retrieve_from(
        &mut self,
        location: &FileLocation,
        options: RetrieveOptions,
    ) -> Result<Retrieved, TierError> {
        let file_name = location.file_name();
        match location.location() {
            Location::Filesystem { directory } => {
                let source = directory.join(file_name);
                match options.mode {
                    RetrieveMode::Copy => {
                        let destination = self.work_dir.join(file_name);
                        self.copier.copy_file(&source, &destination)?;
                        self.params.add_result_file_to_skip(file_name);
                        self.reporter
                            .debug(format!("copied {source} to {destination}"));
                        Ok(Retrieved::Copied {
                            path: destination,
                            tier: location.tier(),
                        })
                    }
                    RetrieveMode::LinkOnly => {
                        let pointer =
                            write_storage_path_info(&self.work_dir, file_name, source.as_str())?;
                        self.params.add_result_file_to_skip(&format!(
                            "{file_name}{STORAGE_PATH_INFO_SUFFIX}"
                        ));
                        Ok(Retrieved::Linked {
                            pointer,
                            source: source.to_string(),
                            tier: location.tier(),
                        })
                    }
                }
            }
            Location::Archive { file_id, .. } => {
                self.enqueue_archived(&location.directory_string(), options.unzip)?;
                self.params.add_result_file_to_skip(file_name);
                Ok(Retrieved::Queued { file_id: *file_id })
            }
        }
    }

    /// Queue the archive file named by a legacy `\\ARCHIVE\...@ARCHIVEID_n` string.
    pub fn enqueue_archived(&mut self, encoded: &str, unzip: bool) -> Result<bool, TierError> {
        let location = Location::from_legacy(encoded)?;
        let file_id = location
            .archive_id()
            .ok_or_else(|| TierError::InvalidLocation(encoded.to_string()))?;
        let file = self
            .resolver
            .archive()
            .lookup(file_id)
            .cloned()
            .ok_or_else(|| {
                TierError::InvalidArchiveId(format!("{file_id} was not returned by any query"))
            })?;
        Ok(self.queue.enqueue(file, unzip))
    }

    /// Download everything queued so far into the working directory.
    pub fn process_download_queue(
        &mut self,
        layout: DownloadLayout,
    ) -> Result<FlushResult, TierError> {
        self.queue.flush(
            self.resolver.archive(),
            self.work_dir.as_std_path(),
            layout,
            &self.reporter,
        )
    }

    /// Reuse a file from a remote cache directory after checking its hashcheck sidecar.
    ///
    /// On failure the local copy and its pointer file are deleted. The cached source and its
    /// sidecar are deleted too when the content hash disagreed, so the step that produced
    /// the cache entry regenerates it.
    pub fn retrieve_cached_file(
        &mut self,
        cached_file: &Utf8Path,
        mode: RetrieveMode,
    ) -> Result<Retrieved, TierError> {
        let file_name = cached_file
            .file_name()
            .ok_or_else(|| TierError::Filesystem(format!("invalid cache path {cached_file}")))?;
        let sidecar = hashcheck_path(cached_file.as_std_path());
        let outcome = self.validator.validate(
            cached_file.as_std_path(),
            &sidecar,
            self.settings.hash_algorithm,
            self.settings.recheck_interval_days,
        );

        if !outcome.is_valid() {
            self.reporter.error(format!(
                "cached file {cached_file} failed validation: {}",
                outcome.message
            ));
            let local = self.work_dir.join(file_name);
            remove_file_if_exists(local.as_std_path())?;
            let pointer = self
                .work_dir
                .join(format!("{file_name}{STORAGE_PATH_INFO_SUFFIX}"));
            remove_file_if_exists(pointer.as_std_path())?;
            if outcome.is_hash_mismatch() {
                self.reporter.warning(format!(
                    "deleting {cached_file} and its hashcheck so it is regenerated"
                ));
                remove_file_if_exists(cached_file.as_std_path())?;
                remove_file_if_exists(&sidecar)?;
            }
            return Err(TierError::IntegrityFailure(outcome.message));
        }

        let directory = cached_file
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        let location = FileLocation::new(
            StorageTier::DatasetStorage,
            file_name,
            Location::filesystem(directory),
        );
        self.retrieve_from(
            &location,
            RetrieveOptions {
                mode,
                search_archive: false,
                unzip: false,
            },
        )
    }

    /// Tidy a retrieved concatenated DTA file: check its headers, drop sparse spectra and
    /// condense it when it is oversized.
    pub fn prepare_cdta(&self, path: &Path) -> Result<CondenseOutcome, TierError> {
        let summary = validate_cdta(path)?;
        if !summary.malformed_headers.is_empty() {
            self.reporter.warning(format!(
                "{} has {} unterminated spectrum header(s), first at line {}",
                path.display(),
                summary.malformed_headers.len(),
                summary.malformed_headers[0]
            ));
        }
        let condenser = LargeTextCondenser::new(self.settings.keep_condenser_backup);
        let sparse = condenser.remove_sparse_spectra(path, &self.reporter)?;
        let condensed = condenser.condense_if_oversized(
            path,
            self.settings.condense_threshold_bytes,
            &self.reporter,
        )?;
        Ok(CondenseOutcome {
            stats: sparse.stats,
            replaced: sparse.replaced || condensed.replaced,
            backup: sparse.backup.or(condensed.backup),
        })
    }
}
