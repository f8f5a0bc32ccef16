use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::Xxh3;

use crate::error::TierError;

pub const HASHCHECK_SUFFIX: &str = ".hashcheck";

const READ_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Xxh128,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Xxh128 => write!(f, "xxh128"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = TierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "xxh128" | "xxh3-128" => Ok(HashAlgorithm::Xxh128),
            other => Err(TierError::UnsupportedHashAlgorithm(other.to_string())),
        }
    }
}

/// Computes file hashes. Split out so validation can be observed without real I/O.
pub trait FileHasher {
    fn hash_file(&self, path: &Path, algorithm: HashAlgorithm) -> Result<String, TierError>;
}

/// Reads the file in fixed-size chunks and returns a lowercase hex digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingHasher;

impl FileHasher for StreamingHasher {
    fn hash_file(&self, path: &Path, algorithm: HashAlgorithm) -> Result<String, TierError> {
        let mut file = fs::File::open(path)
            .map_err(|err| TierError::Filesystem(format!("open {}: {err}", path.display())))?;
        let mut buffer = vec![0u8; READ_BUFFER_BYTES];
        match algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let read = file
                        .read(&mut buffer)
                        .map_err(|err| TierError::Filesystem(err.to_string()))?;
                    if read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..read]);
                }
                Ok(hex::encode(hasher.finalize()))
            }
            HashAlgorithm::Xxh128 => {
                let mut hasher = Xxh3::new();
                loop {
                    let read = file
                        .read(&mut buffer)
                        .map_err(|err| TierError::Filesystem(err.to_string()))?;
                    if read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..read]);
                }
                Ok(format!("{:032x}", hasher.digest128()))
            }
        }
    }
}

/// Sidecar metadata kept next to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashcheckRecord {
    pub size: u64,
    pub last_write_utc: DateTime<Utc>,
    pub algorithm: Option<HashAlgorithm>,
    /// Empty when only size and timestamp are tracked.
    pub hash: String,
}

impl HashcheckRecord {
    pub fn has_hash(&self) -> bool {
        !self.hash.trim().is_empty()
    }

    pub fn to_text(&self) -> String {
        let algorithm = self.algorithm.map(|alg| alg.to_string()).unwrap_or_default();
        format!(
            "# Hashcheck file created {}\nsize={}\nmodification_date_utc={}\nhashtype={}\nhash={}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            self.size,
            self.last_write_utc
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            algorithm,
            self.hash
        )
    }

    pub fn parse(text: &str) -> Result<Self, TierError> {
        let mut size = None;
        let mut last_write_utc = None;
        let mut algorithm = None;
        let mut hash = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "size" => {
                    size = Some(value.parse::<u64>().map_err(|_| {
                        TierError::Hashcheck(format!("invalid size value: {value}"))
                    })?)
                }
                "modification_date_utc" => {
                    let parsed = DateTime::parse_from_rfc3339(value).map_err(|_| {
                        TierError::Hashcheck(format!("invalid modification date: {value}"))
                    })?;
                    last_write_utc = Some(parsed.with_timezone(&Utc));
                }
                "hashtype" if !value.is_empty() => algorithm = Some(value.parse()?),
                "hash" => hash = value.to_string(),
                _ => {}
            }
        }

        Ok(Self {
            size: size.ok_or_else(|| TierError::Hashcheck("missing size".to_string()))?,
            last_write_utc: last_write_utc
                .ok_or_else(|| TierError::Hashcheck("missing modification date".to_string()))?,
            algorithm,
            hash,
        })
    }

    pub fn read(path: &Path) -> Result<Self, TierError> {
        let text = fs::read_to_string(path)
            .map_err(|err| TierError::Hashcheck(format!("read {}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn write(&self, path: &Path) -> Result<(), TierError> {
        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
        fs::write(&tmp_path, self.to_text())
            .map_err(|err| TierError::Filesystem(err.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|err| TierError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn hashcheck_path(data_file: &Path) -> PathBuf {
    PathBuf::from(format!("{}{HASHCHECK_SUFFIX}", data_file.display()))
}

/// Size and last-write time (UTC, millisecond precision) of a file on disk.
pub fn file_stamp(path: &Path) -> Result<(u64, DateTime<Utc>), TierError> {
    let metadata = fs::metadata(path)
        .map_err(|err| TierError::Filesystem(format!("stat {}: {err}", path.display())))?;
    let modified = metadata
        .modified()
        .map_err(|err| TierError::Filesystem(err.to_string()))?;
    Ok((metadata.len(), truncate_millis(DateTime::<Utc>::from(modified))))
}

fn truncate_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Trusted; `rehashed` tells whether the bytes were read.
    Valid { rehashed: bool },
    MissingRecord,
    MissingDataFile,
    SizeMismatch,
    TimestampMismatch,
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub verdict: Verdict,
    pub message: String,
}

impl ValidationOutcome {
    fn new(verdict: Verdict, message: String) -> Self {
        Self { verdict, message }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.verdict, Verdict::Valid { .. })
    }

    /// True only for a content mismatch, the one failure that condemns the source copy too.
    pub fn is_hash_mismatch(&self) -> bool {
        self.verdict == Verdict::HashMismatch
    }
}

pub struct CacheValidator<H: FileHasher = StreamingHasher> {
    hasher: H,
}

impl Default for CacheValidator<StreamingHasher> {
    fn default() -> Self {
        Self::new(StreamingHasher)
    }
}

impl<H: FileHasher> CacheValidator<H> {
    pub fn new(hasher: H) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Check `data_file` against its sidecar record.
    ///
    /// A record younger than `recheck_interval_days` whose size and timestamp match is
    /// trusted without reading the file. Otherwise the file is hashed; a matching hash on an
    /// aged record rewrites the record so the interval restarts.
    pub fn validate(
        &self,
        data_file: &Path,
        hashcheck_file: &Path,
        algorithm: HashAlgorithm,
        recheck_interval_days: u32,
    ) -> ValidationOutcome {
        let record = match HashcheckRecord::read(hashcheck_file) {
            Ok(record) => record,
            Err(err) => return ValidationOutcome::new(Verdict::MissingRecord, err.to_string()),
        };
        let (size, last_write) = match file_stamp(data_file) {
            Ok(stamp) => stamp,
            Err(err) => return ValidationOutcome::new(Verdict::MissingDataFile, err.to_string()),
        };

        if size != record.size {
            return ValidationOutcome::new(
                Verdict::SizeMismatch,
                format!(
                    "size of {} is {size} bytes; hashcheck records {}",
                    data_file.display(),
                    record.size
                ),
            );
        }

        let timestamp_matches = last_write == truncate_millis(record.last_write_utc);
        let record_age = fs::metadata(hashcheck_file)
            .and_then(|meta| meta.modified())
            .map(|modified| Utc::now() - DateTime::<Utc>::from(modified))
            .unwrap_or(TimeDelta::MAX);
        let fresh = record_age < TimeDelta::days(i64::from(recheck_interval_days));

        if timestamp_matches && fresh {
            return ValidationOutcome::new(
                Verdict::Valid { rehashed: false },
                format!("size and timestamp match for {}", data_file.display()),
            );
        }

        if !record.has_hash() {
            if timestamp_matches {
                return self.refresh(data_file, hashcheck_file, record, algorithm);
            }
            return ValidationOutcome::new(
                Verdict::TimestampMismatch,
                format!(
                    "last write time of {} is {last_write}; hashcheck records {}",
                    data_file.display(),
                    record.last_write_utc
                ),
            );
        }

        let record_algorithm = record.algorithm.unwrap_or(algorithm);
        let actual = match self.hasher.hash_file(data_file, record_algorithm) {
            Ok(hash) => hash,
            Err(err) => return ValidationOutcome::new(Verdict::MissingDataFile, err.to_string()),
        };
        if !actual.eq_ignore_ascii_case(record.hash.trim()) {
            return ValidationOutcome::new(
                Verdict::HashMismatch,
                format!(
                    "{record_algorithm} of {} is {actual}; hashcheck records {}",
                    data_file.display(),
                    record.hash
                ),
            );
        }
        if !timestamp_matches {
            return ValidationOutcome::new(
                Verdict::TimestampMismatch,
                format!(
                    "content of {} matches but last write time {last_write} differs from {}",
                    data_file.display(),
                    record.last_write_utc
                ),
            );
        }

        let refreshed = HashcheckRecord {
            algorithm: Some(record_algorithm),
            hash: actual,
            ..record
        };
        match refreshed.write(hashcheck_file) {
            Ok(()) => ValidationOutcome::new(
                Verdict::Valid { rehashed: true },
                format!("hash verified for {}", data_file.display()),
            ),
            Err(err) => ValidationOutcome::new(
                Verdict::Valid { rehashed: true },
                format!("hash verified for {} but record not refreshed: {err}", data_file.display()),
            ),
        }
    }

    /// Aged size-only record: hash the file now and store it.
    fn refresh(
        &self,
        data_file: &Path,
        hashcheck_file: &Path,
        record: HashcheckRecord,
        algorithm: HashAlgorithm,
    ) -> ValidationOutcome {
        let hash = match self.hasher.hash_file(data_file, algorithm) {
            Ok(hash) => hash,
            Err(err) => return ValidationOutcome::new(Verdict::MissingDataFile, err.to_string()),
        };
        let refreshed = HashcheckRecord {
            algorithm: Some(algorithm),
            hash,
            ..record
        };
        let message = match refreshed.write(hashcheck_file) {
            Ok(()) => format!("hash recorded for {}", data_file.display()),
            Err(err) => format!("hash computed for {} but not recorded: {err}", data_file.display()),
        };
        ValidationOutcome::new(Verdict::Valid { rehashed: true }, message)
    }

    /// Write the sidecar for `data_file`. With `compute_hash` false the hash field is left
    /// empty and only size and timestamp are tracked.
    pub fn create_hashcheck_file(
        &self,
        data_file: &Path,
        compute_hash: bool,
        algorithm: HashAlgorithm,
    ) -> Result<PathBuf, TierError> {
        let (size, last_write_utc) = file_stamp(data_file)?;
        let (algorithm, hash) = if compute_hash {
            (Some(algorithm), self.hasher.hash_file(data_file, algorithm)?)
        } else {
            (None, String::new())
        };
        let record = HashcheckRecord {
            size,
            last_write_utc,
            algorithm,
            hash,
        };
        let path = hashcheck_path(data_file);
        record.write(&path)?;
        Ok(path)
    }
}
