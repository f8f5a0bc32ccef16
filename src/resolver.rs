use std::fs;
use std::io;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;

use crate::archive::{ArchiveClient, ArchiveService, Clock, SystemClock};
use crate::candidates::{Candidate, JobLayout, SearchDir, TierCandidateBuilder};
use crate::domain::{ArchivePath, FileLocation, Location};
use crate::report::StatusReporter;

/// Result of one pass over the candidate list.
enum Scan {
    Found(FileLocation),
    Missed { io_failures: usize },
}

/// Walks the storage tiers in order and reports where a file can be obtained.
pub struct Resolver<S: ArchiveService, R: StatusReporter, C: Clock = SystemClock> {
    builder: TierCandidateBuilder,
    layout: JobLayout,
    archive: ArchiveClient<S, R, C>,
    reporter: R,
    retry_holdoff: Duration,
}

impl<S: ArchiveService, R: StatusReporter, C: Clock> Resolver<S, R, C> {
    pub fn new(
        builder: TierCandidateBuilder,
        layout: JobLayout,
        archive: ArchiveClient<S, R, C>,
        reporter: R,
    ) -> Self {
        Self {
            builder,
            layout,
            archive,
            reporter,
            retry_holdoff: Duration::from_secs(5),
        }
    }

    pub fn with_retry_holdoff(mut self, holdoff: Duration) -> Self {
        self.retry_holdoff = holdoff;
        self
    }

    pub fn archive(&self) -> &ArchiveClient<S, R, C> {
        &self.archive
    }

    pub fn archive_mut(&mut self) -> &mut ArchiveClient<S, R, C> {
        &mut self.archive
    }

    /// Location of `file_name` on the first tier that has it.
    ///
    /// Passes that hit a local I/O failure are repeated up to `max_attempts` times; a clean
    /// miss is final. A miss is reported as an error when the archive tiers were searched and
    /// as a warning otherwise.
    pub fn find(
        &mut self,
        file_name: &str,
        search_archive_tier: bool,
        max_attempts: u32,
    ) -> Option<FileLocation> {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.scan_tiers(file_name, search_archive_tier) {
                Scan::Found(location) => {
                    self.reporter.debug(format!(
                        "found {file_name} on tier {}: {}",
                        location.tier(),
                        location.directory_string()
                    ));
                    return Some(location);
                }
                Scan::Missed { io_failures: 0 } => break,
                Scan::Missed { io_failures } => {
                    if attempt == attempts {
                        break;
                    }
                    self.reporter.warning(format!(
                        "{io_failures} storage location(s) unreadable while looking for {file_name}; retrying (attempt {} of {attempts})",
                        attempt + 1
                    ));
                    thread::sleep(self.retry_holdoff);
                }
            }
        }

        let message = format!(
            "{file_name} not found for dataset {} in any storage tier",
            self.layout.dataset
        );
        if search_archive_tier {
            self.reporter.error(message);
        } else {
            self.reporter.warning(message);
        }
        None
    }

    fn scan_tiers(&mut self, file_name: &str, search_archive_tier: bool) -> Scan {
        let mut io_failures = 0;
        for candidate in self.builder.build(&self.layout, search_archive_tier) {
            match &candidate.dir {
                SearchDir::Filesystem(dir) => match file_in_directory(dir, file_name) {
                    Ok(true) => {
                        return Scan::Found(FileLocation::new(
                            candidate.tier,
                            file_name,
                            Location::filesystem(dir.clone()),
                        ));
                    }
                    Ok(false) => {}
                    Err(err) => {
                        io_failures += 1;
                        self.reporter
                            .warning(format!("cannot examine {dir} for {file_name}: {err}"));
                    }
                },
                SearchDir::Archive(path) => {
                    if let Some(location) = self.scan_archive(&candidate, path, file_name) {
                        return Scan::Found(location);
                    }
                }
            }
        }
        Scan::Missed { io_failures }
    }

    fn scan_archive(
        &mut self,
        candidate: &Candidate,
        path: &ArchivePath,
        file_name: &str,
    ) -> Option<FileLocation> {
        let files = self.archive.query(
            file_name,
            path.subdirectory.as_deref(),
            &path.dataset,
            false,
        );
        let newest = files
            .iter()
            .filter(|file| !file.is_directory)
            .max_by_key(|file| file.transaction_id)?;
        Some(FileLocation::new(
            candidate.tier,
            file_name,
            Location::Archive {
                path: path.clone(),
                file_id: newest.file_id,
            },
        ))
    }
}

/// Directory exists and holds a regular file named `file_name`. Absence is `Ok(false)`;
/// any other stat failure is returned.
fn file_in_directory(dir: &Utf8Path, file_name: &str) -> io::Result<bool> {
    match fs::metadata(dir.as_std_path()) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }
    match fs::metadata(dir.join(file_name).as_std_path()) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
