use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zippr::{
    CompressionMethod, DuplicatePolicy, EntryFilter, EntryHeader, FillPolicy, LocalFileReader,
    OverwritePolicy, UnzipOptions, ZipError, ZipExtractor, ZipMode, ZipOptions, ZipWriter,
};

/// A small source tree:
///
/// ```text
/// src/a.txt
/// src/nested/b.txt
/// src/nested/big.bin   (200 KiB of random data)
/// ```
fn source_tree() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("src");
    fs::create_dir_all(root.join("nested")).unwrap();
    fs::write(root.join("a.txt"), "hello hello hello hello\n").unwrap();
    fs::write(root.join("nested/b.txt"), "").unwrap();
    zippr::generate(&root.join("nested/big.bin"), 200 * 1024, &FillPolicy::Random { seed: 7 })
        .unwrap();
    (dir, root)
}

fn options_relative_to(base: &Path) -> ZipOptions {
    ZipOptions {
        strip_prefix: Some(base.to_path_buf()),
        ..ZipOptions::default()
    }
}

fn names(archive: &Path) -> Vec<String> {
    zippr::list(archive)
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect()
}

#[test]
fn zip_then_unzip_round_trips() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");

    let written = zippr::zip(&archive, &[&root], &options_relative_to(dir.path())).unwrap();
    assert_eq!(written.len(), 5);

    assert_eq!(
        names(&archive),
        ["src/", "src/a.txt", "src/nested/", "src/nested/b.txt", "src/nested/big.bin"]
    );

    let dest = dir.path().join("restored");
    zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap();
    for rel in ["a.txt", "nested/b.txt", "nested/big.bin"] {
        assert_eq!(
            fs::read(dest.join("src").join(rel)).unwrap(),
            fs::read(root.join(rel)).unwrap(),
            "{rel}"
        );
    }
}

#[test]
fn list_reports_sizes_and_methods() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    zippr::zip(&archive, &[&root], &options_relative_to(dir.path())).unwrap();

    let entries = zippr::list(&archive).unwrap();
    let text = entries.iter().find(|e| e.file_name == "src/a.txt").unwrap();
    assert_eq!(text.uncompressed_size, 24);
    assert_eq!(text.compression_method, CompressionMethod::Deflate);
    assert!(text.compressed_size < text.uncompressed_size);

    let empty = entries.iter().find(|e| e.file_name == "src/nested/b.txt").unwrap();
    assert_eq!(empty.uncompressed_size, 0);
    assert_eq!(empty.compression_method, CompressionMethod::Stored);

    let dirs: Vec<_> = entries.iter().filter(|e| e.is_directory).collect();
    assert_eq!(dirs.len(), 2);
    assert!(dirs.iter().all(|e| e.uncompressed_size == 0));
}

#[test]
fn cherry_pick_uses_base_names() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("picked.zip");
    let options = ZipOptions {
        mode: ZipMode::CherryPick,
        ..ZipOptions::default()
    };
    zippr::zip(&archive, &[root.join("a.txt"), root.join("nested")], &options).unwrap();
    assert_eq!(
        names(&archive),
        ["a.txt", "nested/", "nested/b.txt", "nested/big.bin"]
    );
}

#[test]
fn store_method_keeps_data_verbatim() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("stored.zip");
    let options = ZipOptions {
        method: CompressionMethod::Stored,
        mode: ZipMode::CherryPick,
        ..ZipOptions::default()
    };
    zippr::zip(&archive, &[root.join("a.txt")], &options).unwrap();
    let entry = &zippr::list(&archive).unwrap()[0];
    assert_eq!(entry.compression_method, CompressionMethod::Stored);
    assert_eq!(entry.compressed_size, entry.uncompressed_size);
}

#[test]
fn append_adds_entries_and_rejects_duplicates() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    let pick = ZipOptions {
        mode: ZipMode::CherryPick,
        ..ZipOptions::default()
    };
    zippr::zip(&archive, &[root.join("a.txt")], &pick).unwrap();

    let append = ZipOptions {
        append: true,
        ..pick.clone()
    };
    let written = zippr::zip(&archive, &[root.join("nested/b.txt")], &append).unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(names(&archive), ["a.txt", "b.txt"]);

    let before = fs::read(&archive).unwrap();
    let err = zippr::zip(&archive, &[root.join("a.txt")], &append).unwrap_err();
    assert!(matches!(err, ZipError::DuplicateEntry(ref n) if n == "a.txt"), "{err:?}");
    assert_eq!(fs::read(&archive).unwrap(), before);

    let allow = ZipOptions {
        duplicates: DuplicatePolicy::Allow,
        ..append
    };
    fs::write(root.join("a.txt"), "second version").unwrap();
    zippr::zip(&archive, &[root.join("a.txt")], &allow).unwrap();
    assert_eq!(names(&archive), ["a.txt", "b.txt", "a.txt"]);

    let reader = LocalFileReader::new(&archive).unwrap();
    let extractor = ZipExtractor::open(reader).unwrap();
    let latest = extractor.find("a.txt").unwrap().unwrap();
    assert_eq!(extractor.read(latest).unwrap(), b"second version");
}

#[test]
fn failed_zip_leaves_existing_archive_untouched() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    zippr::zip(&archive, &[&root], &options_relative_to(dir.path())).unwrap();
    let before = fs::read(&archive).unwrap();

    let missing = dir.path().join("does-not-exist");
    let err = zippr::zip(&archive, &[&root, &missing], &options_relative_to(dir.path()))
        .unwrap_err();
    assert!(matches!(err, ZipError::SourceNotFound(ref p) if *p == missing), "{err:?}");
    assert_eq!(fs::read(&archive).unwrap(), before);

    // No temporary files left next to the archive.
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 2, "{leftovers:?}");
}

#[test]
fn invalid_arguments_are_rejected() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    let no_sources: [&Path; 0] = [];
    assert!(matches!(
        zippr::zip(&archive, &no_sources, &ZipOptions::default()),
        Err(ZipError::InvalidArgument(_))
    ));
    let bad_level = ZipOptions {
        level: 12,
        ..ZipOptions::default()
    };
    assert!(matches!(
        zippr::zip(&archive, &[&root], &bad_level),
        Err(ZipError::InvalidArgument(_))
    ));
    assert!(!archive.exists());
}

#[test]
fn list_of_non_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.txt");
    fs::write(&path, "this is not a zip file at all").unwrap();
    let err = zippr::list(&path).unwrap_err();
    assert!(matches!(err, ZipError::NotAnArchive(_)), "{err:?}");
    assert_eq!(err.kind().exit_code(), 3);

    let err = zippr::list(&dir.path().join("missing.zip")).unwrap_err();
    assert!(matches!(err, ZipError::SourceNotFound(_)), "{err:?}");
}

#[test]
fn path_traversal_is_refused_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("evil.zip");
    let mut writer = ZipWriter::new(File::create(&archive).unwrap());
    writer
        .add_bytes(&EntryHeader::file("good.txt", CompressionMethod::Stored), b"fine")
        .unwrap();
    writer
        .add_bytes(&EntryHeader::file("../escape.txt", CompressionMethod::Stored), b"bad")
        .unwrap();
    writer.finish().unwrap();
    drop(writer);

    let dest = dir.path().join("out");
    let err = zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap_err();
    assert!(matches!(err, ZipError::PathTraversal(ref n) if n == "../escape.txt"), "{err:?}");
    assert!(!dir.path().join("escape.txt").exists());
    assert!(!dest.join("good.txt").exists());
}

fn write_archive(path: &Path, entries: &[(EntryHeader, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (header, data) in entries {
        writer.add_bytes(header, data).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn chained_symlinks_cannot_escape() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("chain.zip");
    write_archive(
        &archive,
        &[
            (EntryHeader::symlink("d"), &b"."[..]),
            (EntryHeader::symlink("d/e"), &b".."[..]),
            (
                EntryHeader::file("d/e/escape.txt", CompressionMethod::Stored),
                &b"outside"[..],
            ),
        ],
    );

    let dest = dir.path().join("out");
    let err = zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap_err();
    assert!(matches!(err, ZipError::PathTraversal(_)), "{err:?}");
    assert!(!dir.path().join("escape.txt").exists());
    assert!(!dest.exists());
}

#[test]
fn files_below_an_extracted_symlink_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("below.zip");
    write_archive(
        &archive,
        &[
            (EntryHeader::directory("real"), &b""[..]),
            (EntryHeader::symlink("lib"), &b"real"[..]),
            (EntryHeader::file("lib/x.so", CompressionMethod::Stored), &b"x"[..]),
        ],
    );

    let dest = dir.path().join("out");
    let err = zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap_err();
    assert!(matches!(err, ZipError::PathTraversal(ref n) if n == "lib/x.so"), "{err:?}");
    assert!(!dest.exists());
}

#[cfg(unix)]
#[test]
fn existing_link_in_destination_is_not_followed() {
    let dir = tempfile::tempdir().unwrap();
    let outside = dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();
    std::os::unix::fs::symlink(&outside, dest.join("sub")).unwrap();

    let archive = dir.path().join("plain.zip");
    write_archive(
        &archive,
        &[(EntryHeader::file("sub/x.txt", CompressionMethod::Stored), &b"x"[..])],
    );

    let err = zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap_err();
    assert!(matches!(err, ZipError::PathTraversal(_)), "{err:?}");
    assert!(!outside.join("x.txt").exists());
}

#[test]
fn corrupted_entry_fails_with_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("data.zip");
    let mut writer = ZipWriter::new(File::create(&archive).unwrap());
    writer
        .add_bytes(
            &EntryHeader::file("data.bin", CompressionMethod::Stored),
            &[0x5Au8; 1000],
        )
        .unwrap();
    writer.finish().unwrap();
    drop(writer);

    let data_offset = {
        let extractor = ZipExtractor::open(LocalFileReader::new(&archive).unwrap()).unwrap();
        let entry = extractor.list_files().unwrap()[0].clone();
        extractor.parser().get_data_offset(&entry).unwrap() as usize
    };
    let mut bytes = fs::read(&archive).unwrap();
    bytes[data_offset + 10] ^= 0x01;
    fs::write(&archive, bytes).unwrap();

    let dest = dir.path().join("out");
    let err = zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap_err();
    assert!(matches!(err, ZipError::ChecksumMismatch { .. }), "{err:?}");
    assert_eq!(err.kind().exit_code(), 5);
    assert!(!dest.join("data.bin").exists());
}

#[test]
fn overwrite_policies() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    let pick = ZipOptions {
        mode: ZipMode::CherryPick,
        ..ZipOptions::default()
    };
    zippr::zip(&archive, &[root.join("a.txt")], &pick).unwrap();

    let dest = dir.path().join("dest");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("a.txt"), "local edit").unwrap();

    let strict = UnzipOptions {
        overwrite: OverwritePolicy::Strict,
        ..UnzipOptions::default()
    };
    let err = zippr::unzip(&archive, &dest, &strict).unwrap_err();
    assert!(matches!(err, ZipError::DestinationExists(_)), "{err:?}");
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "local edit");

    let skip = UnzipOptions {
        overwrite: OverwritePolicy::Skip,
        ..UnzipOptions::default()
    };
    assert!(zippr::unzip(&archive, &dest, &skip).unwrap().is_empty());
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "local edit");

    let extracted = zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap();
    assert_eq!(extracted, [dest.join("a.txt")]);
    assert_eq!(
        fs::read_to_string(dest.join("a.txt")).unwrap(),
        "hello hello hello hello\n"
    );
}

#[test]
fn filters_and_junk_paths() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    zippr::zip(&archive, &[&root], &options_relative_to(dir.path())).unwrap();

    let dest = dir.path().join("flat");
    let options = UnzipOptions {
        filter: EntryFilter::new(vec!["*.txt".into()], vec!["nested".into()]),
        junk_paths: true,
        ..UnzipOptions::default()
    };
    let extracted = zippr::unzip(&archive, &dest, &options).unwrap();
    assert_eq!(extracted, [dest.join("a.txt")]);
    assert!(!dest.join("src").exists());
}

#[cfg(unix)]
#[test]
fn permissions_and_mtime_are_restored() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, SystemTime};

    let (dir, root) = source_tree();
    let script = root.join("run.sh");
    fs::write(&script, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    File::options()
        .write(true)
        .open(&script)
        .unwrap()
        .set_modified(mtime)
        .unwrap();

    let archive = dir.path().join("out.zip");
    let pick = ZipOptions {
        mode: ZipMode::CherryPick,
        ..ZipOptions::default()
    };
    zippr::zip(&archive, &[&script], &pick).unwrap();

    let dest = dir.path().join("dest");
    zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap();
    let meta = fs::metadata(dest.join("run.sh")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o750);
    assert_eq!(meta.modified().unwrap(), mtime);
}

#[cfg(unix)]
#[test]
fn symlinks_are_stored_as_links() {
    let (dir, root) = source_tree();
    std::os::unix::fs::symlink("a.txt", root.join("link")).unwrap();

    let archive = dir.path().join("out.zip");
    zippr::zip(&archive, &[&root], &options_relative_to(dir.path())).unwrap();
    let entries = zippr::list(&archive).unwrap();
    let link = entries.iter().find(|e| e.file_name == "src/link").unwrap();
    assert_eq!(link.kind(), zippr::EntryKind::Symlink);

    let dest = dir.path().join("dest");
    zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap();
    let restored = dest.join("src/link");
    assert_eq!(fs::read_link(&restored).unwrap(), PathBuf::from("a.txt"));
    assert_eq!(
        fs::read_to_string(&restored).unwrap(),
        "hello hello hello hello\n"
    );
}

#[test]
fn generated_files_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    zippr::generate(&a, 10_000_000, &FillPolicy::Random { seed: 42 }).unwrap();
    zippr::generate(&b, 10_000_000, &FillPolicy::Random { seed: 42 }).unwrap();
    assert_eq!(fs::metadata(&a).unwrap().len(), 10_000_000);
    assert!(fs::read(&a).unwrap() == fs::read(&b).unwrap());

    let empty = dir.path().join("empty.bin");
    zippr::generate(&empty, 0, &FillPolicy::Zeros).unwrap();
    assert_eq!(fs::metadata(&empty).unwrap().len(), 0);
}

#[test]
fn large_generated_file_streams_through_archive() {
    let dir = tempfile::tempdir().unwrap();
    let big = dir.path().join("big.bin");
    zippr::generate_mb(&big, 3).unwrap();

    let archive = dir.path().join("big.zip");
    let pick = ZipOptions {
        mode: ZipMode::CherryPick,
        ..ZipOptions::default()
    };
    zippr::zip(&archive, &[&big], &pick).unwrap();
    let entry = &zippr::list(&archive).unwrap()[0];
    assert_eq!(entry.uncompressed_size, 3 << 20);
    assert!(entry.compressed_size < 64 * 1024);

    let dest = dir.path().join("dest");
    zippr::unzip(&archive, &dest, &UnzipOptions::default()).unwrap();
    let restored = fs::read(dest.join("big.bin")).unwrap();
    assert_eq!(restored.len(), 3 << 20);
    assert!(restored.iter().all(|b| *b == 0));
}

#[test]
fn closed_archive_refuses_work() {
    let (dir, root) = source_tree();
    let archive = dir.path().join("out.zip");
    zippr::zip(&archive, &[&root], &options_relative_to(dir.path())).unwrap();

    let extractor = ZipExtractor::open(LocalFileReader::new(&archive).unwrap()).unwrap();
    let entry = extractor.list_files().unwrap()[1].clone();
    extractor.close().unwrap();
    assert!(matches!(extractor.read(&entry), Err(ZipError::ArchiveClosed)));
    assert!(matches!(extractor.list_files(), Err(ZipError::ArchiveClosed)));
}
