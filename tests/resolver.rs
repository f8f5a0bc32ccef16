use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use tierfetch::archive::{ArchiveClient, ArchiveQuery, ArchiveService, NoArchive};
use tierfetch::candidates::{JobLayout, TierCandidateBuilder, TierParents};
use tierfetch::domain::{ArchiveFileId, ArchivedFileRef, Location, StorageTier};
use tierfetch::error::TierError;
use tierfetch::report::{RecordingReporter, Severity};
use tierfetch::resolver::Resolver;

const DATASET: &str = "QC_Shew_16_01";

#[derive(Default)]
struct StubArchive {
    files: Vec<ArchivedFileRef>,
    searches: Cell<usize>,
}

impl ArchiveService for StubArchive {
    fn search(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedFileRef>, TierError> {
        self.searches.set(self.searches.get() + 1);
        Ok(self
            .files
            .iter()
            .filter(|file| file.dataset == query.dataset)
            .filter(|file| file.file_name() == query.file_name_pattern)
            .filter(|file| file.subdirectory() == query.subdirectory)
            .cloned()
            .collect())
    }

    fn download(&self, _file: &ArchivedFileRef, _destination: &Path) -> Result<(), TierError> {
        Ok(())
    }
}

struct Tiers {
    _temp: tempfile::TempDir,
    transfer: Utf8PathBuf,
    storage: Utf8PathBuf,
    long_term: Utf8PathBuf,
}

impl Tiers {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let tiers = Self {
            transfer: root.join("transfer"),
            storage: root.join("storage"),
            long_term: root.join("archive"),
            _temp: temp,
        };
        for dir in [&tiers.transfer, &tiers.storage, &tiers.long_term] {
            fs::create_dir_all(dir.as_std_path()).unwrap();
        }
        tiers
    }

    fn parents(&self, remote_archive_enabled: bool) -> TierParents {
        TierParents {
            transfer: Some(self.transfer.clone()),
            dataset_storage: Some(self.storage.clone()),
            long_term_archive: Some(self.long_term.clone()),
            remote_archive_enabled,
        }
    }

    fn place(root: &Utf8PathBuf, subdir: &str, file_name: &str) {
        let dir = if subdir.is_empty() {
            root.join(DATASET)
        } else {
            root.join(DATASET).join(subdir)
        };
        fs::create_dir_all(dir.as_std_path()).unwrap();
        fs::write(dir.join(file_name).as_std_path(), b"payload").unwrap();
    }
}

fn layout() -> JobLayout {
    JobLayout {
        dataset: DATASET.to_string(),
        input_dir: "SIC201".to_string(),
        shared_results_dirs: vec!["MSXML_Gen_1_39".to_string(), "MSXML_Gen_1_93".to_string()],
    }
}

fn archived(id: u64, relative_path: &str, transaction_id: u64) -> ArchivedFileRef {
    ArchivedFileRef {
        file_id: ArchiveFileId::new(id),
        dataset: DATASET.to_string(),
        relative_path: relative_path.to_string(),
        transaction_id,
        is_directory: false,
    }
}

#[test]
fn lowest_tier_wins_when_file_is_everywhere() {
    let tiers = Tiers::new();
    Tiers::place(&tiers.transfer, "", "QC.raw");
    Tiers::place(&tiers.storage, "SIC201", "QC.raw");
    Tiers::place(&tiers.long_term, "", "QC.raw");
    let reporter = RecordingReporter::new();
    let archive = ArchiveClient::new(
        StubArchive {
            files: vec![archived(5, "QC.raw", 1)],
            ..StubArchive::default()
        },
        &reporter,
    );
    let mut resolver = Resolver::new(
        TierCandidateBuilder::new(tiers.parents(true)),
        layout(),
        archive,
        &reporter,
    );

    let found = resolver.find("QC.raw", true, 1).unwrap();
    assert_eq!(found.tier(), StorageTier::TransferDirectory);
    assert_eq!(
        found.local_path().unwrap(),
        tiers.transfer.join(DATASET).join("QC.raw")
    );
    assert_eq!(resolver.archive().service().searches.get(), 0);
}

#[test]
fn last_shared_results_directory_is_searched_first() {
    let tiers = Tiers::new();
    Tiers::place(&tiers.storage, "MSXML_Gen_1_39", "QC.mzML");
    Tiers::place(&tiers.storage, "MSXML_Gen_1_93", "QC.mzML");
    let reporter = RecordingReporter::new();
    let mut resolver = Resolver::new(
        TierCandidateBuilder::new(tiers.parents(false)),
        layout(),
        ArchiveClient::new(NoArchive, &reporter),
        &reporter,
    );

    let found = resolver.find("QC.mzML", false, 1).unwrap();
    assert_eq!(found.tier(), StorageTier::SharedResultsSubdirectory);
    assert_eq!(
        found.local_path().unwrap(),
        tiers.storage.join(DATASET).join("MSXML_Gen_1_93").join("QC.mzML")
    );
}

#[test]
fn archive_hit_picks_newest_transaction() {
    let tiers = Tiers::new();
    Tiers::place(&tiers.long_term, "", "QC.raw");
    let reporter = RecordingReporter::new();
    let archive = ArchiveClient::new(
        StubArchive {
            files: vec![archived(7, "QC.raw", 3), archived(9, "QC.raw", 8)],
            ..StubArchive::default()
        },
        &reporter,
    );
    let mut resolver = Resolver::new(
        TierCandidateBuilder::new(tiers.parents(true)),
        layout(),
        archive,
        &reporter,
    );

    let found = resolver.find("QC.raw", true, 1).unwrap();
    assert_eq!(found.tier(), StorageTier::RemoteArchive);
    assert_eq!(found.archive_id(), Some(ArchiveFileId::new(9)));
    assert_eq!(
        found.directory_string(),
        r"\\ARCHIVE\QC_Shew_16_01@ARCHIVEID_9"
    );
    assert_matches!(found.location(), Location::Archive { .. });
    // Input dir and both shared-results dirs were asked before the bare dataset directory.
    assert_eq!(resolver.archive().service().searches.get(), 4);
}

#[test]
fn miss_is_error_only_when_archive_was_searched() {
    let tiers = Tiers::new();
    let reporter = RecordingReporter::new();
    let mut resolver = Resolver::new(
        TierCandidateBuilder::new(tiers.parents(true)),
        layout(),
        ArchiveClient::new(StubArchive::default(), &reporter),
        &reporter,
    );

    assert!(resolver.find("absent.raw", false, 1).is_none());
    assert_eq!(reporter.count(Severity::Warning), 1);
    assert_eq!(reporter.count(Severity::Error), 0);

    reporter.clear();
    assert!(resolver.find("absent.raw", true, 1).is_none());
    assert_eq!(reporter.count(Severity::Error), 1);
    assert_eq!(reporter.count(Severity::Warning), 0);
}

#[test]
fn unreadable_tier_is_skipped() {
    let tiers = Tiers::new();
    // A regular file where the transfer share should be makes every lookup below it fail.
    fs::remove_dir_all(tiers.transfer.as_std_path()).unwrap();
    fs::write(tiers.transfer.as_std_path(), b"not a directory").unwrap();
    Tiers::place(&tiers.storage, "", "QC.raw");
    let reporter = RecordingReporter::new();
    let mut resolver = Resolver::new(
        TierCandidateBuilder::new(tiers.parents(false)),
        layout(),
        ArchiveClient::new(NoArchive, &reporter),
        &reporter,
    );

    let found = resolver.find("QC.raw", false, 1).unwrap();
    assert_eq!(found.tier(), StorageTier::DatasetStorage);
    assert!(reporter.count(Severity::Warning) >= 1);
}

#[test]
fn io_failures_are_retried_up_to_max_attempts() {
    let tiers = Tiers::new();
    fs::remove_dir_all(tiers.transfer.as_std_path()).unwrap();
    fs::write(tiers.transfer.as_std_path(), b"not a directory").unwrap();
    let reporter = RecordingReporter::new();
    let mut resolver = Resolver::new(
        TierCandidateBuilder::new(tiers.parents(false)),
        layout(),
        ArchiveClient::new(NoArchive, &reporter),
        &reporter,
    )
    .with_retry_holdoff(Duration::ZERO);

    assert!(resolver.find("QC.raw", false, 3).is_none());
    let retries = reporter
        .messages(Severity::Warning)
        .iter()
        .filter(|message| message.contains("retrying"))
        .count();
    assert_eq!(retries, 2);
}
