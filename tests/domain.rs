use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use tierfetch::domain::{
    ArchiveFileId, ArchivePath, ArchivedFileRef, FileLocation, Location, StorageTier,
};
use tierfetch::error::TierError;

#[test]
fn archive_location_survives_the_legacy_string() {
    let location = Location::Archive {
        path: ArchivePath::new("QC_Shew_16_01", Some("SIC201".to_string())),
        file_id: ArchiveFileId::new(123456),
    };
    let encoded = location.to_legacy_string();
    assert_eq!(encoded, r"\\ARCHIVE\QC_Shew_16_01\SIC201@ARCHIVEID_123456");
    assert_eq!(Location::from_legacy(&encoded).unwrap(), location);
}

#[test]
fn plain_paths_are_filesystem_locations() {
    let location = Location::from_legacy("/mnt/storage/QC_Shew_16_01").unwrap();
    assert_eq!(
        location,
        Location::Filesystem {
            directory: Utf8PathBuf::from("/mnt/storage/QC_Shew_16_01")
        }
    );
    assert_eq!(location.archive_id(), None);
}

#[test]
fn archive_strings_need_an_id_and_a_dataset() {
    assert_matches!(
        Location::from_legacy(r"\\ARCHIVE\QC_Shew_16_01"),
        Err(TierError::InvalidLocation(_))
    );
    assert_matches!(
        Location::from_legacy(r"\\ARCHIVE\@ARCHIVEID_5"),
        Err(TierError::InvalidLocation(_))
    );
}

#[test]
fn archive_ids_parse_with_or_without_tag() {
    assert_eq!("@ARCHIVEID_77".parse::<ArchiveFileId>().unwrap().get(), 77);
    assert_eq!(" 77 ".parse::<ArchiveFileId>().unwrap().get(), 77);
    assert_matches!(
        "ARCHIVE77".parse::<ArchiveFileId>(),
        Err(TierError::InvalidArchiveId(_))
    );
}

#[test]
fn archived_file_paths_split_into_directory_and_name() {
    let file = ArchivedFileRef {
        file_id: ArchiveFileId::new(1),
        dataset: "QC_Shew_16_01".to_string(),
        relative_path: r"SIC201\QC_Shew_16_01_SICs.zip".to_string(),
        transaction_id: 4,
        is_directory: false,
    };
    assert_eq!(file.file_name(), "QC_Shew_16_01_SICs.zip");
    assert_eq!(file.subdirectory().as_deref(), Some("SIC201"));
}

#[test]
fn local_path_only_for_filesystem_hits() {
    let local = FileLocation::new(
        StorageTier::TransferDirectory,
        "QC.raw",
        Location::filesystem("/transfer/QC_Shew_16_01"),
    );
    assert_eq!(
        local.local_path(),
        Some(Utf8PathBuf::from("/transfer/QC_Shew_16_01/QC.raw"))
    );

    let remote = FileLocation::new(
        StorageTier::RemoteArchive,
        "QC.raw",
        Location::Archive {
            path: ArchivePath::new("QC_Shew_16_01", None),
            file_id: ArchiveFileId::new(9),
        },
    );
    assert_eq!(remote.local_path(), None);
    assert_eq!(remote.archive_id(), Some(ArchiveFileId::new(9)));
}
