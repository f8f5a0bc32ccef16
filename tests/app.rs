use std::fs;
use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use tierfetch::app::{
    RetrievalSettings, RetrieveMode, RetrieveOptions, Retrieved, Retriever,
};
use tierfetch::archive::{ArchiveClient, ArchiveQuery, ArchiveService};
use tierfetch::candidates::{JobLayout, TierCandidateBuilder, TierParents};
use tierfetch::config::ResolvedConfig;
use tierfetch::domain::{ArchiveFileId, ArchivedFileRef, StorageTier};
use tierfetch::download::DownloadLayout;
use tierfetch::error::TierError;
use tierfetch::hashcheck::{
    CacheValidator, HashAlgorithm, HashcheckRecord, StreamingHasher, hashcheck_path,
};
use tierfetch::params::{self, JobParameters};
use tierfetch::report::RecordingReporter;
use tierfetch::resolver::Resolver;
use tierfetch::store::{RetryingCopier, read_storage_path_info};

const DATASET: &str = "QC_Shew_16_01";

#[derive(Default)]
struct ArchiveWith {
    files: Vec<ArchivedFileRef>,
}

impl ArchiveService for ArchiveWith {
    fn search(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedFileRef>, TierError> {
        Ok(self
            .files
            .iter()
            .filter(|file| file.file_name() == query.file_name_pattern)
            .filter(|file| file.subdirectory() == query.subdirectory)
            .cloned()
            .collect())
    }

    fn download(&self, file: &ArchivedFileRef, destination: &Path) -> Result<(), TierError> {
        fs::write(destination, format!("archived {}", file.relative_path))
            .map_err(|err| TierError::Filesystem(err.to_string()))
    }
}

struct Job {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    work_dir: Utf8PathBuf,
    params: JobParameters,
}

impl Job {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let work_dir = root.join("work");
        fs::create_dir_all(work_dir.as_std_path()).unwrap();
        let params = JobParameters::new()
            .with(params::DATASET_NAME, DATASET)
            .with(params::INPUT_FOLDER_NAME, "SIC201")
            .with(params::SHARED_RESULTS_FOLDERS, "MSXML_Gen_1_93")
            .with(params::TRANSFER_FOLDER_PATH, root.join("transfer").as_str())
            .with(params::DATASET_STORAGE_PATH, root.join("storage").as_str());
        Self {
            _temp: temp,
            root,
            work_dir,
            params,
        }
    }

    fn storage_file(&self, subdir: &str, file_name: &str, contents: &str) -> Utf8PathBuf {
        let dir = self.root.join("storage").join(DATASET).join(subdir);
        fs::create_dir_all(dir.as_std_path()).unwrap();
        let path = dir.join(file_name);
        fs::write(path.as_std_path(), contents).unwrap();
        path
    }

    fn retriever<'a, S: ArchiveService>(
        &'a self,
        service: S,
        reporter: &'a RecordingReporter,
        settings: RetrievalSettings,
    ) -> Retriever<'a, JobParameters, S, &'a RecordingReporter, RetryingCopier> {
        let parents = TierParents::from_params(&self.params, true);
        let layout = JobLayout::from_params(&self.params).unwrap();
        let resolver = Resolver::new(
            TierCandidateBuilder::new(parents),
            layout,
            ArchiveClient::new(service, reporter),
            reporter,
        )
        .with_retry_holdoff(Duration::ZERO);
        Retriever::new(
            resolver,
            RetryingCopier::new(1, Duration::ZERO),
            CacheValidator::default(),
            &self.params,
            reporter,
            self.work_dir.clone(),
            settings,
        )
    }
}

fn settings() -> RetrievalSettings {
    RetrievalSettings::from(&ResolvedConfig::default())
}

fn local_only() -> RetrieveOptions {
    RetrieveOptions {
        search_archive: false,
        ..RetrieveOptions::default()
    }
}

#[test]
fn copied_file_is_added_to_the_skip_list() {
    let job = Job::new();
    job.storage_file("SIC201", "QC_SICs.xml", "<sic/>");
    let reporter = RecordingReporter::new();
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, settings());

    let retrieved = retriever.retrieve_file("QC_SICs.xml", local_only()).unwrap();

    let expected = job.work_dir.join("QC_SICs.xml");
    assert_eq!(
        retrieved,
        Retrieved::Copied {
            path: expected.clone(),
            tier: StorageTier::DatasetStorage,
        }
    );
    assert_eq!(fs::read_to_string(expected.as_std_path()).unwrap(), "<sic/>");
    assert_eq!(job.params.result_files_to_skip(), vec!["QC_SICs.xml"]);
}

#[test]
fn link_only_writes_a_pointer_instead_of_copying() {
    let job = Job::new();
    let source = job.storage_file("MSXML_Gen_1_93", "QC.mzML", "<mzML/>");
    let reporter = RecordingReporter::new();
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, settings());

    let retrieved = retriever
        .retrieve_file(
            "QC.mzML",
            RetrieveOptions {
                mode: RetrieveMode::LinkOnly,
                ..local_only()
            },
        )
        .unwrap();

    let (pointer, tier) = match retrieved {
        Retrieved::Linked { pointer, tier, .. } => (pointer, tier),
        other => panic!("expected a pointer file, got {other:?}"),
    };
    assert_eq!(tier, StorageTier::SharedResultsSubdirectory);
    assert_eq!(pointer, job.work_dir.join("QC.mzML_StoragePathInfo.txt"));
    assert_eq!(
        read_storage_path_info(pointer.as_std_path()).unwrap(),
        source.as_str()
    );
    assert!(!job.work_dir.join("QC.mzML").exists());
    assert_eq!(
        job.params.result_files_to_skip(),
        vec!["QC.mzML_StoragePathInfo.txt"]
    );
}

#[test]
fn archive_only_file_is_queued_then_downloaded() {
    let job = Job::new();
    let reporter = RecordingReporter::new();
    let service = ArchiveWith {
        files: vec![ArchivedFileRef {
            file_id: ArchiveFileId::new(42),
            dataset: DATASET.to_string(),
            relative_path: "QC.raw".to_string(),
            transaction_id: 7,
            is_directory: false,
        }],
    };
    let mut retriever = job.retriever(service, &reporter, settings());

    let retrieved = retriever
        .retrieve_file("QC.raw", RetrieveOptions::default())
        .unwrap();
    assert_eq!(
        retrieved,
        Retrieved::Queued {
            file_id: ArchiveFileId::new(42)
        }
    );
    assert!(retriever.queue().contains(ArchiveFileId::new(42)));
    assert!(!job.work_dir.join("QC.raw").exists());

    let flushed = retriever
        .process_download_queue(DownloadLayout::Flat)
        .unwrap();
    assert_eq!(flushed.downloaded.len(), 1);
    assert_eq!(
        fs::read_to_string(job.work_dir.join("QC.raw").as_std_path()).unwrap(),
        "archived QC.raw"
    );
    assert!(retriever.queue().is_empty());

    let encoded = r"\\ARCHIVE\QC_Shew_16_01@ARCHIVEID_42";
    assert!(retriever.enqueue_archived(encoded, false).unwrap());
    retriever.process_download_queue(DownloadLayout::Flat).unwrap();
    retriever
        .resolver_mut()
        .archive_mut()
        .clear_found_files();
    assert_matches!(
        retriever.enqueue_archived(encoded, false),
        Err(TierError::InvalidArchiveId(_))
    );
}

#[test]
fn missing_file_is_not_found() {
    let job = Job::new();
    let reporter = RecordingReporter::new();
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, settings());

    assert_matches!(
        retriever.retrieve_file("absent.raw", local_only()),
        Err(TierError::NotFound(name)) if name == "absent.raw"
    );
    assert!(job.params.result_files_to_skip().is_empty());
}

#[test]
fn only_archive_strings_with_known_ids_can_be_queued() {
    let job = Job::new();
    let reporter = RecordingReporter::new();
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, settings());

    assert_matches!(
        retriever.enqueue_archived(r"\\ARCHIVE\QC_Shew_16_01@ARCHIVEID_5", false),
        Err(TierError::InvalidArchiveId(_))
    );
    assert_matches!(
        retriever.enqueue_archived(r"\\ARCHIVE\QC_Shew_16_01", false),
        Err(TierError::InvalidLocation(_))
    );
    assert_matches!(
        retriever.enqueue_archived("/storage/QC_Shew_16_01", false),
        Err(TierError::InvalidLocation(_))
    );
}

fn cached_file(job: &Job, contents: &str) -> Utf8PathBuf {
    let cache_dir = job.root.join("msxml_cache").join("MSXML_Gen_1_93");
    fs::create_dir_all(cache_dir.as_std_path()).unwrap();
    let cached = cache_dir.join("QC.mzML");
    fs::write(cached.as_std_path(), contents).unwrap();
    CacheValidator::new(StreamingHasher)
        .create_hashcheck_file(cached.as_std_path(), true, HashAlgorithm::Sha256)
        .unwrap();
    cached
}

fn stale_local_copies(work_dir: &Utf8Path) {
    fs::write(work_dir.join("QC.mzML").as_std_path(), "stale").unwrap();
    fs::write(
        work_dir.join("QC.mzML_StoragePathInfo.txt").as_std_path(),
        "/old/location\n",
    )
    .unwrap();
}

#[test]
fn valid_cache_entry_is_reused() {
    let job = Job::new();
    let cached = cached_file(&job, "<mzML>cached</mzML>");
    let reporter = RecordingReporter::new();
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, settings());

    let retrieved = retriever
        .retrieve_cached_file(&cached, RetrieveMode::Copy)
        .unwrap();
    assert_matches!(retrieved, Retrieved::Copied { ref path, .. } if *path == job.work_dir.join("QC.mzML"));
    assert_eq!(
        fs::read_to_string(job.work_dir.join("QC.mzML").as_std_path()).unwrap(),
        "<mzML>cached</mzML>"
    );
}

#[test]
fn hash_mismatch_deletes_the_cache_entry() {
    let job = Job::new();
    let cached = cached_file(&job, "<mzML>cached</mzML>");
    let sidecar = hashcheck_path(cached.as_std_path());
    let mut record = HashcheckRecord::read(&sidecar).unwrap();
    record.hash = "0".repeat(64);
    record.write(&sidecar).unwrap();
    stale_local_copies(&job.work_dir);

    let reporter = RecordingReporter::new();
    let mut strict = settings();
    strict.recheck_interval_days = 0;
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, strict);

    assert_matches!(
        retriever.retrieve_cached_file(&cached, RetrieveMode::Copy),
        Err(TierError::IntegrityFailure(_))
    );
    assert!(!job.work_dir.join("QC.mzML").exists());
    assert!(!job.work_dir.join("QC.mzML_StoragePathInfo.txt").exists());
    assert!(!cached.exists());
    assert!(!sidecar.exists());
}

#[test]
fn other_validation_failures_keep_the_cache_entry() {
    let job = Job::new();
    let cached = cached_file(&job, "<mzML>cached</mzML>");
    fs::write(cached.as_std_path(), "<mzML>truncated").unwrap();
    stale_local_copies(&job.work_dir);

    let reporter = RecordingReporter::new();
    let mut retriever = job.retriever(ArchiveWith::default(), &reporter, settings());

    assert_matches!(
        retriever.retrieve_cached_file(&cached, RetrieveMode::Copy),
        Err(TierError::IntegrityFailure(_))
    );
    assert!(!job.work_dir.join("QC.mzML").exists());
    assert!(!job.work_dir.join("QC.mzML_StoragePathInfo.txt").exists());
    assert!(cached.exists());
    assert!(hashcheck_path(cached.as_std_path()).exists());
}

#[test]
fn retrieved_cdta_is_filtered_before_use() {
    let job = Job::new();
    let reporter = RecordingReporter::new();
    let retriever = job.retriever(ArchiveWith::default(), &reporter, settings());
    let dta = job.work_dir.join("QC_Shew_16_01_dta.txt");
    fs::write(
        dta.as_std_path(),
        "=\"QC.1.1.2.dta\"==\n500.1 2\n100.0 1\n=\"QC.2.2.2.dta\"==\n600.2 2\n110.0 1\n\
         =\"QC.3.3.2.dta\"==\n700.3 2\n120.0 1\n130.0 2\n140.0 3\n",
    )
    .unwrap();

    let outcome = retriever.prepare_cdta(dta.as_std_path()).unwrap();

    assert_eq!(outcome.stats.spectra_read, 3);
    assert_eq!(outcome.stats.spectra_removed, 1);
    assert!(outcome.replaced);
    let text = fs::read_to_string(dta.as_std_path()).unwrap();
    assert!(text.contains("QC.1.1.2.dta"));
    assert!(!text.contains("QC.2.2.2.dta"));
}
