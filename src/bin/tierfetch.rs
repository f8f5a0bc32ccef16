use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use tierfetch::app::{RetrievalSettings, Retrieved, RetrieveMode, RetrieveOptions, Retriever};
use tierfetch::archive::{ArchiveClient, ArchiveHttpClient, ArchiveService, NoArchive};
use tierfetch::candidates::{JobLayout, TierCandidateBuilder, TierParents};
use tierfetch::condenser::{LargeTextCondenser, validate_cdta};
use tierfetch::config::{ConfigLoader, ResolvedConfig};
use tierfetch::domain::FileLocation;
use tierfetch::download::DownloadLayout;
use tierfetch::error::TierError;
use tierfetch::hashcheck::{CacheValidator, StreamingHasher, hashcheck_path};
use tierfetch::output::{ConsoleReporter, JsonOutput, OutputMode};
use tierfetch::params::{
    DATASET_ARCHIVE_PATH, DATASET_NAME, DATASET_STORAGE_PATH, INPUT_FOLDER_NAME, JobParameters,
    SHARED_RESULTS_FOLDERS, TRANSFER_FOLDER_PATH,
};
use tierfetch::resolver::Resolver;
use tierfetch::store::RetryingCopier;

#[derive(Parser)]
#[command(name = "tierfetch")]
#[command(about = "Locate and retrieve analysis job inputs across storage tiers")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Report which storage tier holds a file")]
    Find(FindArgs),
    #[command(about = "Retrieve files into a working directory")]
    Fetch(FetchArgs),
    #[command(about = "Create or check hashcheck sidecar files")]
    Hashcheck(HashcheckArgs),
    #[command(about = "Filter or shrink concatenated DTA text files")]
    Condense(CondenseArgs),
}

#[derive(Args, Clone)]
struct JobArgs {
    #[arg(long)]
    dataset: String,

    #[arg(long, default_value = "")]
    input_dir: String,

    /// Comma-separated; the last directory listed is searched first.
    #[arg(long, default_value = "")]
    shared_results: String,

    #[arg(long)]
    transfer: Option<String>,

    #[arg(long)]
    storage: Option<String>,

    #[arg(long)]
    archive_path: Option<String>,

    /// Skip the remote and long-term archive tiers.
    #[arg(long)]
    no_archive: bool,
}

#[derive(Args)]
struct FindArgs {
    file_name: String,

    #[command(flatten)]
    job: JobArgs,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(required = true)]
    file_names: Vec<String>,

    #[command(flatten)]
    job: JobArgs,

    #[arg(long)]
    work_dir: String,

    #[arg(long)]
    link_only: bool,

    #[arg(long)]
    unzip: bool,

    #[arg(long, value_enum, default_value_t = LayoutArg::Flat)]
    layout: LayoutArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Flat,
    SingleDataset,
    MultiDataset,
}

impl From<LayoutArg> for DownloadLayout {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::Flat => DownloadLayout::Flat,
            LayoutArg::SingleDataset => DownloadLayout::SingleDataset,
            LayoutArg::MultiDataset => DownloadLayout::MultiDataset,
        }
    }
}

#[derive(Args)]
struct HashcheckArgs {
    #[command(subcommand)]
    command: HashcheckCommand,
}

#[derive(Subcommand)]
enum HashcheckCommand {
    #[command(about = "Write a .hashcheck file next to a data file")]
    Create {
        path: String,
        /// Record only size and timestamp.
        #[arg(long)]
        no_hash: bool,
    },
    #[command(about = "Check a data file against its .hashcheck file")]
    Validate {
        path: String,
        #[arg(long)]
        recheck_days: Option<u32>,
    },
}

#[derive(Args)]
struct CondenseArgs {
    #[command(subcommand)]
    command: CondenseCommand,
}

#[derive(Subcommand)]
enum CondenseCommand {
    #[command(about = "Remove spectra with fewer than three ions")]
    Sparse {
        path: String,
        #[arg(long)]
        keep_backup: bool,
    },
    #[command(about = "Shorten numbers when the file exceeds a size limit")]
    Size {
        path: String,
        #[arg(long)]
        threshold: Option<u64>,
        #[arg(long)]
        keep_backup: bool,
    },
    #[command(about = "Check spectrum headers")]
    Validate { path: String },
}

#[derive(Serialize)]
struct FetchReport {
    items: Vec<Retrieved>,
    downloaded: Vec<String>,
    extracted: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<TierError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TierError) -> u8 {
    match error {
        TierError::NotFound(_) | TierError::MissingConfig | TierError::MissingParameter(_) => 2,
        TierError::ArchiveHttp(_)
        | TierError::ArchiveStatus { .. }
        | TierError::ArchiveConnectivity(_)
        | TierError::Download(_) => 3,
        TierError::IntegrityFailure(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = load_config(cli.config.as_deref())?;
    let reporter = ConsoleReporter::new(mode);

    match cli.command {
        Commands::Find(args) => {
            let params = job_parameters(&args.job);
            if config.archive.is_enabled() && !args.job.no_archive {
                let service = ArchiveHttpClient::new(
                    config.archive.base_url.as_deref().unwrap_or_default(),
                    config.archive.timeout,
                )
                .into_diagnostic()?;
                run_find(service, &config, &params, &args, reporter, mode)
            } else {
                run_find(NoArchive, &config, &params, &args, reporter, mode)
            }
        }
        Commands::Fetch(args) => {
            let params = job_parameters(&args.job);
            if config.archive.is_enabled() && !args.job.no_archive {
                let service = ArchiveHttpClient::new(
                    config.archive.base_url.as_deref().unwrap_or_default(),
                    config.archive.timeout,
                )
                .into_diagnostic()?;
                run_fetch(service, &config, &params, &args, reporter, mode)
            } else {
                run_fetch(NoArchive, &config, &params, &args, reporter, mode)
            }
        }
        Commands::Hashcheck(args) => run_hashcheck(args, &config, mode),
        Commands::Condense(args) => run_condense(args, &config, reporter, mode),
    }
}

fn load_config(path: Option<&str>) -> miette::Result<ResolvedConfig> {
    match ConfigLoader::resolve(path) {
        Ok(config) => Ok(config),
        Err(TierError::MissingConfig) if path.is_none() => Ok(ResolvedConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn job_parameters(job: &JobArgs) -> JobParameters {
    let mut params = JobParameters::new()
        .with(DATASET_NAME, job.dataset.clone())
        .with(INPUT_FOLDER_NAME, job.input_dir.clone())
        .with(SHARED_RESULTS_FOLDERS, job.shared_results.clone());
    if let Some(value) = &job.transfer {
        params.set(TRANSFER_FOLDER_PATH, value.clone());
    }
    if let Some(value) = &job.storage {
        params.set(DATASET_STORAGE_PATH, value.clone());
    }
    if let Some(value) = &job.archive_path {
        params.set(DATASET_ARCHIVE_PATH, value.clone());
    }
    params
}

fn build_resolver<S: ArchiveService>(
    service: S,
    config: &ResolvedConfig,
    params: &JobParameters,
    reporter: ConsoleReporter,
) -> Result<Resolver<S, ConsoleReporter>, TierError> {
    let archive_enabled = config.archive.is_enabled();
    let builder = TierCandidateBuilder::new(TierParents::from_params(params, archive_enabled));
    let layout = JobLayout::from_params(params)?;
    let archive = ArchiveClient::new(service, reporter);
    Ok(Resolver::new(builder, layout, archive, reporter).with_retry_holdoff(config.retry_holdoff))
}

fn run_find<S: ArchiveService>(
    service: S,
    config: &ResolvedConfig,
    params: &JobParameters,
    args: &FindArgs,
    reporter: ConsoleReporter,
    mode: OutputMode,
) -> miette::Result<()> {
    let mut resolver = build_resolver(service, config, params, reporter)?;
    let location: FileLocation = resolver
        .find(&args.file_name, !args.job.no_archive, config.max_attempts)
        .ok_or_else(|| TierError::NotFound(args.file_name.clone()))?;
    match mode {
        OutputMode::Json => JsonOutput::print(&location).into_diagnostic()?,
        OutputMode::Human => println!("{}\t{}", location.tier(), location.directory_string()),
    }
    Ok(())
}

fn run_fetch<S: ArchiveService>(
    service: S,
    config: &ResolvedConfig,
    params: &JobParameters,
    args: &FetchArgs,
    reporter: ConsoleReporter,
    mode: OutputMode,
) -> miette::Result<()> {
    let resolver = build_resolver(service, config, params, reporter)?;
    let work_dir = Utf8PathBuf::from(&args.work_dir);
    std::fs::create_dir_all(work_dir.as_std_path())
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    let mut retriever = Retriever::new(
        resolver,
        RetryingCopier::new(config.copy_attempts, config.retry_holdoff),
        CacheValidator::default(),
        params,
        reporter,
        work_dir,
        RetrievalSettings::from(config),
    );
    let options = RetrieveOptions {
        mode: if args.link_only {
            RetrieveMode::LinkOnly
        } else {
            RetrieveMode::Copy
        },
        search_archive: !args.job.no_archive,
        unzip: args.unzip,
    };

    let mut items = Vec::new();
    for file_name in &args.file_names {
        items.push(retriever.retrieve_file(file_name, options)?);
    }
    let flushed = retriever.process_download_queue(args.layout.into())?;

    let report = FetchReport {
        items,
        downloaded: flushed.downloaded.iter().map(|p| p.display().to_string()).collect(),
        extracted: flushed.extracted.iter().map(|p| p.display().to_string()).collect(),
    };
    match mode {
        OutputMode::Json => JsonOutput::print(&report).into_diagnostic()?,
        OutputMode::Human => {
            for item in &report.items {
                match item {
                    Retrieved::Copied { path, tier } => println!("copied\t{tier}\t{path}"),
                    Retrieved::Linked { pointer, tier, .. } => {
                        println!("linked\t{tier}\t{pointer}")
                    }
                    Retrieved::Queued { file_id } => println!("queued\tarchive\t{file_id}"),
                }
            }
            for path in &report.downloaded {
                println!("downloaded\t{path}");
            }
        }
    }
    Ok(())
}

fn run_hashcheck(args: HashcheckArgs, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let validator = CacheValidator::new(StreamingHasher);
    match args.command {
        HashcheckCommand::Create { path, no_hash } => {
            let sidecar = validator.create_hashcheck_file(
                std::path::Path::new(&path),
                !no_hash,
                config.hash_algorithm,
            )?;
            match mode {
                OutputMode::Json => JsonOutput::print(&sidecar).into_diagnostic()?,
                OutputMode::Human => println!("{}", sidecar.display()),
            }
            Ok(())
        }
        HashcheckCommand::Validate { path, recheck_days } => {
            let data = std::path::Path::new(&path);
            let outcome = validator.validate(
                data,
                &hashcheck_path(data),
                config.hash_algorithm,
                recheck_days.unwrap_or(config.recheck_interval_days),
            );
            match mode {
                OutputMode::Json => JsonOutput::print(&outcome).into_diagnostic()?,
                OutputMode::Human => println!("{}", outcome.message),
            }
            if outcome.is_valid() {
                Ok(())
            } else {
                Err(TierError::IntegrityFailure(outcome.message).into())
            }
        }
    }
}

fn run_condense(
    args: CondenseArgs,
    config: &ResolvedConfig,
    reporter: ConsoleReporter,
    mode: OutputMode,
) -> miette::Result<()> {
    let outcome = match args.command {
        CondenseCommand::Sparse { path, keep_backup } => LargeTextCondenser::new(keep_backup)
            .remove_sparse_spectra(std::path::Path::new(&path), &reporter)?,
        CondenseCommand::Size {
            path,
            threshold,
            keep_backup,
        } => LargeTextCondenser::new(keep_backup).condense_if_oversized(
            std::path::Path::new(&path),
            threshold.unwrap_or(config.condense_threshold_bytes),
            &reporter,
        )?,
        CondenseCommand::Validate { path } => {
            let summary = validate_cdta(std::path::Path::new(&path))?;
            match mode {
                OutputMode::Json => JsonOutput::print(&summary).into_diagnostic()?,
                OutputMode::Human => println!(
                    "{} spectra, {} malformed header(s)",
                    summary.spectra,
                    summary.malformed_headers.len()
                ),
            }
            return Ok(());
        }
    };
    match mode {
        OutputMode::Json => JsonOutput::print(&outcome).into_diagnostic()?,
        OutputMode::Human => println!(
            "{} spectra read, {} removed, replaced: {}",
            outcome.stats.spectra_read, outcome.stats.spectra_removed, outcome.replaced
        ),
    }
    Ok(())
}
