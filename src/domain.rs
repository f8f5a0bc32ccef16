use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TierError;

/// Leading token of legacy directory strings that point into the remote archive.
pub const ARCHIVE_SENTINEL: &str = r"\\ARCHIVE";

/// Suffix token carrying the numeric archive file id on a legacy path string.
pub const ARCHIVE_ID_TAG: &str = "@ARCHIVEID_";

static ARCHIVE_ID_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@ARCHIVEID_(\d+)$").expect("static regex"));

/// Storage tiers in fallback priority order. Derived `Ord` follows declaration order,
/// so a smaller tier always wins over a larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    TransferDirectory,
    DatasetStorage,
    SharedResultsSubdirectory,
    RemoteArchive,
    LongTermArchivePath,
}

impl StorageTier {
    pub const ALL: [StorageTier; 5] = [
        StorageTier::TransferDirectory,
        StorageTier::DatasetStorage,
        StorageTier::SharedResultsSubdirectory,
        StorageTier::RemoteArchive,
        StorageTier::LongTermArchivePath,
    ];

    pub fn is_archive(self) -> bool {
        matches!(self, StorageTier::RemoteArchive)
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::TransferDirectory => write!(f, "transfer"),
            StorageTier::DatasetStorage => write!(f, "dataset-storage"),
            StorageTier::SharedResultsSubdirectory => write!(f, "shared-results"),
            StorageTier::RemoteArchive => write!(f, "remote-archive"),
            StorageTier::LongTermArchivePath => write!(f, "long-term-archive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveFileId(u64);

impl ArchiveFileId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArchiveFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArchiveFileId {
    type Err = TierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix(ARCHIVE_ID_TAG).unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TierError::InvalidArchiveId(value.to_string()))
    }
}

/// A file known to the remote archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedFileRef {
    pub file_id: ArchiveFileId,
    pub dataset: String,
    pub relative_path: String,
    pub transaction_id: u64,
    #[serde(default)]
    pub is_directory: bool,
}

impl ArchivedFileRef {
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.relative_path.as_str())
    }

    /// Directory portion of `relative_path`, normalized to forward slashes.
    pub fn subdirectory(&self) -> Option<String> {
        let normalized = self.relative_path.replace('\\', "/");
        normalized
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .filter(|dir| !dir.is_empty())
    }
}

/// Directory inside the remote archive, addressed by dataset and optional subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchivePath {
    pub dataset: String,
    pub subdirectory: Option<String>,
}

impl ArchivePath {
    pub fn new(dataset: impl Into<String>, subdirectory: Option<String>) -> Self {
        Self {
            dataset: dataset.into(),
            subdirectory: subdirectory.filter(|value| !value.trim().is_empty()),
        }
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ARCHIVE_SENTINEL}\\{}", self.dataset)?;
        if let Some(sub) = &self.subdirectory {
            write!(f, "\\{}", sub.replace('/', "\\"))?;
        }
        Ok(())
    }
}

/// Where a resolved file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Filesystem {
        directory: Utf8PathBuf,
    },
    Archive {
        path: ArchivePath,
        file_id: ArchiveFileId,
    },
}

impl Location {
    pub fn filesystem(directory: impl Into<Utf8PathBuf>) -> Self {
        Location::Filesystem {
            directory: directory.into(),
        }
    }

    pub fn archive_id(&self) -> Option<ArchiveFileId> {
        match self {
            Location::Filesystem { .. } => None,
            Location::Archive { file_id, .. } => Some(*file_id),
        }
    }

    /// Render as a legacy directory string: plain path, or sentinel path plus id suffix.
    pub fn to_legacy_string(&self) -> String {
        match self {
            Location::Filesystem { directory } => directory.to_string(),
            Location::Archive { path, file_id } => format!("{path}{ARCHIVE_ID_TAG}{file_id}"),
        }
    }

    /// Parse a legacy directory string. Anything starting with the archive sentinel is routed
    /// to the archive variant and must carry an id suffix.
    pub fn from_legacy(value: &str) -> Result<Self, TierError> {
        if !is_archive_path(value) {
            return Ok(Location::filesystem(value));
        }
        let (clean, file_id) = split_archive_id(value);
        let file_id = file_id.ok_or_else(|| TierError::InvalidLocation(value.to_string()))?;
        let rest = clean
            .strip_prefix(ARCHIVE_SENTINEL)
            .unwrap_or_default()
            .trim_matches(['\\', '/']);
        let mut parts = rest.splitn(2, ['\\', '/']);
        let dataset = parts
            .next()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| TierError::InvalidLocation(value.to_string()))?;
        let subdirectory = parts.next().map(|sub| sub.replace('\\', "/"));
        Ok(Location::Archive {
            path: ArchivePath::new(dataset, subdirectory),
            file_id,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_legacy_string())
    }
}

pub fn is_archive_path(value: &str) -> bool {
    value.starts_with(ARCHIVE_SENTINEL)
}

/// Split `path@ARCHIVEID_123` into the clean path and the id.
pub fn split_archive_id(value: &str) -> (&str, Option<ArchiveFileId>) {
    match ARCHIVE_ID_SUFFIX.captures(value) {
        Some(captures) => {
            let whole = captures.get(0).map(|m| m.start()).unwrap_or(value.len());
            let id = captures
                .get(1)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .map(ArchiveFileId::new);
            (&value[..whole], id)
        }
        None => (value, None),
    }
}

/// Outcome of a successful resolution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLocation {
    tier: StorageTier,
    file_name: String,
    location: Location,
}

impl FileLocation {
    pub fn new(tier: StorageTier, file_name: impl Into<String>, location: Location) -> Self {
        Self {
            tier,
            file_name: file_name.into(),
            location,
        }
    }

    pub fn tier(&self) -> StorageTier {
        self.tier
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn archive_id(&self) -> Option<ArchiveFileId> {
        self.location.archive_id()
    }

    /// Full path of the file when it lives on a filesystem tier.
    pub fn local_path(&self) -> Option<Utf8PathBuf> {
        match &self.location {
            Location::Filesystem { directory } => Some(directory.join(&self.file_name)),
            Location::Archive { .. } => None,
        }
    }

    pub fn directory_string(&self) -> String {
        self.location.to_legacy_string()
    }
}

/// Join path segments, skipping blank ones instead of inserting empty components.
pub fn join_segments(parent: &Utf8Path, segments: &[&str]) -> Utf8PathBuf {
    let mut path = parent.to_path_buf();
    for segment in segments {
        let trimmed = segment.trim().trim_matches(['/', '\\']);
        if !trimmed.is_empty() {
            path.push(trimmed);
        }
    }
    path
}
