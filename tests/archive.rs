mod common;

use anyhow::Result;
use chrono::NaiveDate;

use ziptab::read::*;
use ziptab::result::ZipError;

use common::*;

fn sample() -> ZipBuilder {
    ZipBuilder::new()
        .stored("hello/hi.txt", b"Hello, world!\n")
        .deflated("hello/sr71.txt", &b"Ask me about my speed. ".repeat(40))
        .stored("empty", b"")
}

#[test]
fn reads_every_entry() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = sample().write(&dir, "sample.zip")?;

    let archive = ZipArchive::open(&path)?;
    assert_eq!(archive.path(), path.as_path());
    assert_eq!(archive.entries().len(), 3);
    assert_eq!(archive.len(), 3);
    assert!(!archive.is_empty());
    assert_eq!(archive.byte_len() as u64, std::fs::metadata(&path)?.len());

    let paths: Vec<_> = archive
        .entries()
        .iter()
        .map(|e| archive.path_text(e).into_owned())
        .collect();
    assert_eq!(paths, ["hello/hi.txt", "hello/sr71.txt", "empty"]);

    let hi = &archive.entries()[0];
    assert_eq!(hi.compression_method, CompressionMethod::None);
    assert_eq!(hi.size, 14);
    assert_eq!(hi.compressed_size, 14);
    assert_eq!(hi.crc32, crc32fast::hash(b"Hello, world!\n"));
    assert_eq!(&*archive.read(hi)?, b"Hello, world!\n");

    let sr71 = &archive.entries()[1];
    assert_eq!(sr71.compression_method, CompressionMethod::Deflate);
    assert!(sr71.compressed_size < sr71.size);
    assert_eq!(&*archive.read(sr71)?, &b"Ask me about my speed. ".repeat(40)[..]);

    assert!(archive.read(&archive.entries()[2])?.is_empty());

    assert_eq!(hi.modified.to_string(), "2021-03-04 05:06:08");
    assert_eq!(
        hi.last_modified(),
        NaiveDate::from_ymd_opt(2021, 3, 4).and_then(|d| d.and_hms_opt(5, 6, 8))
    );
    Ok(())
}

#[test]
fn opening_twice_gives_the_same_entries() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = sample().write(&dir, "sample.zip")?;

    let first = ZipArchive::open(&path)?;
    let second = ZipArchive::open(&path)?;
    assert_eq!(first.entries(), second.entries());
    Ok(())
}

#[test]
fn rejects_files_that_arent_zips() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    let text = write_bytes(&dir, "text.zip", b"This is not a ZIP archive at all.")?;
    assert!(matches!(ZipArchive::open(&text), Err(ZipError::NotAZip)));

    let empty = write_bytes(&dir, "empty.zip", b"")?;
    assert!(matches!(ZipArchive::open(&empty), Err(ZipError::NotAZip)));

    let missing = dir.path().join("missing.zip");
    let missing = missing.to_str().expect("UTF-8 temp path");
    assert!(matches!(
        ZipArchive::open(missing),
        Err(ZipError::CannotOpen { .. })
    ));
    Ok(())
}

#[test]
fn rejects_truncated_archives() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    let stub = write_bytes(&dir, "stub.zip", b"PK\x03\x04 and a bit")?;
    assert!(matches!(ZipArchive::open(&stub), Err(ZipError::Truncated(_))));

    // Cut off partway through the end record
    let mut bytes = sample().build();
    bytes.truncate(bytes.len() - 10);
    let cut = write_bytes(&dir, "cut.zip", &bytes)?;
    assert!(ZipArchive::open(&cut).is_err());
    Ok(())
}

#[test]
fn rejects_bad_central_directory() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = sample().break_central_signature().write(&dir, "bad.zip")?;
    assert!(matches!(
        ZipArchive::open(&path),
        Err(ZipError::InvalidArchive(_))
    ));
    Ok(())
}

#[test]
fn skips_archive_comment() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = sample()
        .comment(b"Comments can be up to 64K, and can even say PK\x05\x06.")
        .write(&dir, "commented.zip")?;
    // The signature inside the comment is too close to the end
    // to be a real end record, so the search passes over it.
    let archive = ZipArchive::open(&path)?;
    assert_eq!(archive.entries().len(), 3);
    Ok(())
}

#[test]
fn decodes_legacy_and_utf8_paths() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    let mut legacy = TestEntry::new("", b"x", STORED);
    legacy.path = b"caf\x82".to_vec();
    let mut modern = TestEntry::new("caf\u{e9}/menu", b"y", STORED);
    modern.flags = UTF8_FLAG;

    let path = ZipBuilder::new()
        .entry(legacy)
        .entry(modern)
        .write(&dir, "paths.zip")?;
    let archive = ZipArchive::open(&path)?;
    let entries = archive.entries();
    assert_eq!(archive.raw_path(&entries[0]), b"caf\x82");
    assert_eq!(archive.path_text(&entries[0]), "caf\u{e9}");
    assert_eq!(archive.path_text(&entries[1]), "caf\u{e9}/menu");
    Ok(())
}

#[test]
fn local_header_decides_where_data_starts() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let mut entry = TestEntry::new("padded", b"payload", STORED);
    entry.local_extra = vec![0xAA; 11];
    let path = ZipBuilder::new().entry(entry).write(&dir, "padded.zip")?;

    let archive = ZipArchive::open(&path)?;
    let entry = &archive.entries()[0];
    assert_eq!(archive.compressed_data(entry)?, b"payload");
    assert_eq!(&*archive.read(entry)?, b"payload");
    Ok(())
}

#[test]
fn broken_entries_fail_alone() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    let mut truncated = TestEntry::new("truncated", &b"squeeze me ".repeat(100), DEFLATED);
    truncated.truncate_payload = Some(4);
    let unsupported = TestEntry::new("bzip2", b"not really bzip2", 12);

    let path = ZipBuilder::new()
        .stored("fine", b"still fine")
        .entry(truncated)
        .entry(unsupported)
        .write(&dir, "broken.zip")?;
    let archive = ZipArchive::open(&path)?;
    let entries = archive.entries();

    assert_eq!(&*archive.read(&entries[0])?, b"still fine");
    assert!(matches!(archive.read(&entries[1]), Err(ZipError::Inflate)));
    assert_eq!(entries[2].compression_method, CompressionMethod::Unsupported(12));
    assert!(matches!(
        archive.read(&entries[2]),
        Err(ZipError::UnsupportedMethod(12))
    ));
    // The raw bytes are still there for the taking.
    assert_eq!(archive.compressed_data(&entries[2])?, b"not really bzip2");
    Ok(())
}

#[cfg(feature = "check-crc")]
#[test]
fn checksum_mismatch() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let mut entry = TestEntry::new("liar", b"checksummed", STORED);
    entry.crc_override = Some(0xdead_beef);
    let path = ZipBuilder::new().entry(entry).write(&dir, "liar.zip")?;

    let archive = ZipArchive::open(&path)?;
    assert!(matches!(
        archive.read(&archive.entries()[0]),
        Err(ZipError::InvalidArchive("Invalid checksum"))
    ));
    Ok(())
}
