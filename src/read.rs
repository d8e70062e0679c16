//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, [`ZipArchive::open`] it.
//! The whole file is memory mapped and its central directory is walked once;
//! every entry is then available as a [`DirectoryEntry`],
//! a handful of fields copied out of the mapped record.
//!
//! [`ZipArchive::open`]: struct.ZipArchive.html#method.open
//! [`DirectoryEntry`]: struct.DirectoryEntry.html

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::ops::Range;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use codepage_437::*;
use log::*;
use memchr::memmem;
use memmap2::Mmap;

use crate::arch::{end_of, usize};
use crate::compress;
use crate::layout::{self, central, end, local, DosDateTime, SIGNATURE_LEN};
use crate::result::*;

const END_MAGIC: [u8; 4] = end::SIGNATURE.to_le_bytes();

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            layout::METHOD_STORED => CompressionMethod::None,
            layout::METHOD_DEFLATED => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    /// The method code as stored in the archive
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::None => layout::METHOD_STORED,
            CompressionMethod::Deflate => layout::METHOD_DEFLATED,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
/// Fields are decoded once, when the archive is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// General purpose bit flags
    pub flags: u16,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// Packed DOS modification time
    pub modified: DosDateTime,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// Compressed size of the file in bytes
    pub compressed_size: u32,

    /// Uncompressed size of the file in bytes
    pub size: u32,

    /// Where the (undecoded) path sits in the archive
    pub(crate) path: Range<usize>,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: usize,
}

impl DirectoryEntry {
    /// Decodes the central directory record at `offset`,
    /// returning it and the offset of the record that follows.
    fn parse(mapping: &[u8], offset: usize) -> ZipResult<(Self, usize)> {
        if end_of(offset, central::LEN)? > mapping.len() {
            return Err(ZipError::Truncated(
                "Central directory runs past the end of the archive",
            ));
        }
        if !layout::has_signature(mapping, offset, central::SIGNATURE) {
            return Err(ZipError::InvalidArchive("Invalid central directory entry"));
        }

        let field = |at| layout::read_u16(mapping, offset + at);
        let wide_field = |at| layout::read_u32(mapping, offset + at);

        let path_length = usize(field(central::PATH_LEN)?)?;
        let extra_field_length = usize(field(central::EXTRA_LEN)?)?;
        let file_comment_length = usize(field(central::COMMENT_LEN)?)?;

        // Never assume a fixed entry size: the variable-length fields
        // (path, extra, comment, in that order) follow the fixed portion.
        let path_start = offset + central::LEN;
        let path_end = end_of(path_start, path_length)?;
        let next = end_of(path_end, extra_field_length)
            .and_then(|extra_end| end_of(extra_end, file_comment_length))?;
        if next > mapping.len() {
            return Err(ZipError::Truncated(
                "Central directory entry runs past the end of the archive",
            ));
        }

        let entry = Self {
            flags: field(central::FLAGS)?,
            compression_method: CompressionMethod::from_u16(field(central::METHOD)?),
            modified: DosDateTime {
                time: field(central::MTIME)?,
                date: field(central::MDATE)?,
            },
            crc32: wide_field(central::CRC32)?,
            compressed_size: wide_field(central::COMPRESSED_LEN)?,
            size: wide_field(central::UNCOMPRESSED_LEN)?,
            path: path_start..path_end,
            header_offset: usize(wide_field(central::LOCAL_HEADER_OFFSET)?)?,
        };
        Ok((entry, next))
    }

    /// The ISO 8601 combined date and time the file was last modified,
    /// if the archive recorded a valid one
    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        self.modified.to_naive()
    }
}

/// A memory-mapped ZIP archive
///
/// The mapping is owned here and released when the archive is dropped;
/// entries only hold offsets into it.
#[derive(Debug)]
pub struct ZipArchive {
    path: Utf8PathBuf,
    /// The contents of the ZIP archive
    mapping: Mmap,
    /// Entries from the ZIP's central directory, in directory order
    entries: Vec<DirectoryEntry>,
}

impl ZipArchive {
    /// Opens and maps the archive at `path`.
    ///
    /// Either the whole central directory checks out and an archive is
    /// returned, or nothing is: the file and mapping are released on
    /// every error path.
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> ZipResult<Self> {
        let path = path.as_ref();
        let cannot_open = |source: io::Error| ZipError::CannotOpen {
            path: path.to_owned(),
            source,
        };

        let mut file = File::open(path).map_err(cannot_open)?;

        // Cheap sanity check before mapping the whole thing.
        let mut magic = [0u8; SIGNATURE_LEN];
        file.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ZipError::NotAZip,
            _ => cannot_open(e),
        })?;
        if u32::from_le_bytes(magic) != local::SIGNATURE {
            return Err(ZipError::NotAZip);
        }

        let length = usize(file.metadata().map_err(cannot_open)?.len())?;
        if length < end::LEN {
            return Err(ZipError::Truncated(
                "Too small for an End Of Central Directory Record",
            ));
        }

        info!("Memory mapping {} ({} bytes)", path, length);
        let mapping = unsafe { Mmap::map(&file).map_err(cannot_open)? };
        // The mapping outlives the descriptor just fine.
        drop(file);

        let entries = read_central_directory(&mapping)?;
        debug!("{}: {} entries", path, entries.len());

        Ok(Self {
            path: path.to_owned(),
            mapping,
            entries,
        })
    }

    /// The path this archive was opened from
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Total length of the archive in bytes
    pub fn byte_len(&self) -> usize {
        self.mapping.len()
    }

    /// Number of entries in the central directory
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Never true for an archive that opened successfully,
    /// since an archive has at least one entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entries found in the ZIP archive's central directory,
    /// in the order they appear there.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// The path of `entry`, exactly as stored
    pub fn raw_path(&self, entry: &DirectoryEntry) -> &[u8] {
        // Bounds were checked when the entry was parsed.
        &self.mapping[entry.path.clone()]
    }

    /// The path of `entry` as text.
    ///
    /// UTF-8 if the entry says so, CP437 otherwise.
    pub fn path_text(&self, entry: &DirectoryEntry) -> Cow<'_, str> {
        decode_path(self.raw_path(entry), entry.flags)
    }

    /// The compressed bytes of `entry`.
    ///
    /// The local file header is authoritative for where these start,
    /// since its path and extra field lengths can differ
    /// from the central directory's copies.
    pub fn compressed_data(&self, entry: &DirectoryEntry) -> ZipResult<&[u8]> {
        let offset = entry.header_offset;
        if end_of(offset, local::LEN)? > self.mapping.len() {
            return Err(ZipError::Truncated(
                "Local file header runs past the end of the archive",
            ));
        }
        if !layout::has_signature(&self.mapping, offset, local::SIGNATURE) {
            return Err(ZipError::InvalidArchive("Missing local file header"));
        }
        let path_length = usize(layout::read_u16(&self.mapping, offset + local::PATH_LEN)?)?;
        let extra_length = usize(layout::read_u16(&self.mapping, offset + local::EXTRA_LEN)?)?;
        let data_start = end_of(offset + local::LEN, path_length)
            .and_then(|path_end| end_of(path_end, extra_length))?;
        layout::bytes_at(&self.mapping, data_start, usize(entry.compressed_size)?)
    }

    /// Reads out the uncompressed contents of `entry`.
    ///
    /// Stored entries are borrowed straight from the mapping.
    pub fn read(&self, entry: &DirectoryEntry) -> ZipResult<Cow<'_, [u8]>> {
        let payload = self.compressed_data(entry)?;
        let contents = compress::decode_entry(
            entry.compression_method,
            payload,
            usize(entry.size)?,
        )?;
        if cfg!(feature = "check-crc") && crc32fast::hash(&contents) != entry.crc32 {
            return Err(ZipError::InvalidArchive("Invalid checksum"));
        }
        Ok(contents)
    }
}

/// Decodes a path as UTF-8 if `flags` says so, CP437 otherwise.
pub(crate) fn decode_path(raw: &[u8], flags: u16) -> Cow<'_, str> {
    if layout::is_utf8(flags) {
        String::from_utf8_lossy(raw)
    } else {
        Cow::borrow_from_cp437(raw, &CP437_CONTROL)
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
pub fn find_end_record(mapping: &[u8]) -> ZipResult<usize> {
    let last_start = mapping
        .len()
        .checked_sub(end::LEN)
        .ok_or(ZipError::Truncated(
            "Too small for an End Of Central Directory Record",
        ))?;
    memmem::rfind(&mapping[..last_start + SIGNATURE_LEN], &END_MAGIC).ok_or(
        ZipError::InvalidArchive("Couldn't find End Of Central Directory Record"),
    )
}

/// Walks the central directory of the archive in `mapping`.
///
/// The list is only handed back once every record has checked out,
/// so callers never see a partial directory.
pub fn read_central_directory(mapping: &[u8]) -> ZipResult<Vec<DirectoryEntry>> {
    let end_posit = find_end_record(mapping)?;
    let entry_count = layout::read_u16(mapping, end_posit + end::ENTRIES)?;
    let directory_start = usize(layout::read_u32(mapping, end_posit + end::DIRECTORY_START)?)?;
    trace!(
        "End of central directory at {}: {} entries starting at {}",
        end_posit,
        entry_count,
        directory_start
    );
    if entry_count == 0 {
        return Err(ZipError::InvalidArchive("Archive has no entries"));
    }

    let mut entries = Vec::with_capacity(usize(entry_count)?);
    let mut posit = directory_start;
    for _ in 0..entry_count {
        let (entry, next) = DirectoryEntry::parse(mapping, posit)?;
        trace!("{:?}", entry);
        entries.push(entry);
        posit = next;
    }
    Ok(entries)
}
