//! Byte layouts of the ZIP records we read.
//!
//! All magic offsets live here; everything else asks this module
//! for a field instead of doing offset math of its own.
//! Comments quote PKWARE's [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use crate::arch::end_of;
use crate::result::*;

/// Length of every record signature
pub const SIGNATURE_LEN: usize = 4;

/// 4.3.7  Local file header:
///
/// ```text
/// local file header signature     4 bytes  (0x04034b50)
/// version needed to extract       2 bytes
/// general purpose bit flag        2 bytes
/// compression method              2 bytes
/// last mod file time              2 bytes
/// last mod file date              2 bytes
/// crc-32                          4 bytes
/// compressed size                 4 bytes
/// uncompressed size               4 bytes
/// file name length                2 bytes
/// extra field length              2 bytes
///
/// file name (variable size)
/// extra field (variable size)
/// ```
pub mod local {
    pub const SIGNATURE: u32 = 0x04034b50;
    pub const FLAGS: usize = 6;
    pub const PATH_LEN: usize = 26;
    pub const EXTRA_LEN: usize = 28;
    /// Size of the fixed portion
    pub const LEN: usize = 30;
}

/// 4.3.12  Central directory structure, file header:
///
/// ```text
/// central file header signature   4 bytes  (0x02014b50)
/// version made by                 2 bytes
/// version needed to extract       2 bytes
/// general purpose bit flag        2 bytes
/// compression method              2 bytes
/// last mod file time              2 bytes
/// last mod file date              2 bytes
/// crc-32                          4 bytes
/// compressed size                 4 bytes
/// uncompressed size               4 bytes
/// file name length                2 bytes
/// extra field length              2 bytes
/// file comment length             2 bytes
/// disk number start               2 bytes
/// internal file attributes        2 bytes
/// external file attributes        4 bytes
/// relative offset of local header 4 bytes
///
/// file name (variable size)
/// extra field (variable size)
/// file comment (variable size)
/// ```
pub mod central {
    pub const SIGNATURE: u32 = 0x02014b50;
    pub const FLAGS: usize = 8;
    pub const METHOD: usize = 10;
    pub const MTIME: usize = 12;
    pub const MDATE: usize = 14;
    pub const CRC32: usize = 16;
    pub const COMPRESSED_LEN: usize = 20;
    pub const UNCOMPRESSED_LEN: usize = 24;
    pub const PATH_LEN: usize = 28;
    pub const EXTRA_LEN: usize = 30;
    pub const COMMENT_LEN: usize = 32;
    pub const LOCAL_HEADER_OFFSET: usize = 42;
    /// Size of the fixed portion; the path follows immediately.
    pub const LEN: usize = 46;
}

/// 4.3.16  End of central directory record:
///
/// ```text
/// end of central dir signature    4 bytes  (0x06054b50)
/// number of this disk             2 bytes
/// number of the disk with the
/// start of the central directory  2 bytes
/// total number of entries in
/// the central dir on this disk    2 bytes
/// total number of entries in
/// the central dir                 2 bytes
/// size of the central directory   4 bytes
/// offset of start of central
/// directory with respect to
/// the starting disk number        4 bytes
/// zipfile comment length          2 bytes
/// ```
pub mod end {
    pub const SIGNATURE: u32 = 0x06054b50;
    pub const ENTRIES: usize = 8;
    pub const DIRECTORY_START: usize = 16;
    /// Size of the fixed portion; a comment of any length may follow.
    pub const LEN: usize = 22;
}

/// Compression method codes (4.4.5)
pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

/// Borrows `width` bytes at `offset`, or explains why we can't.
pub fn bytes_at(buf: &[u8], offset: usize, width: usize) -> ZipResult<&[u8]> {
    let end = end_of(offset, width)?;
    buf.get(offset..end)
        .ok_or(ZipError::Truncated("Field runs past the end of the archive"))
}

/// Reads a little-endian u32 at `offset`.
pub fn read_u32(buf: &[u8], offset: usize) -> ZipResult<u32> {
    let width = std::mem::size_of::<u32>();
    let mut int_bytes = [0u8; std::mem::size_of::<u32>()];
    int_bytes.copy_from_slice(bytes_at(buf, offset, width)?);
    Ok(u32::from_le_bytes(int_bytes))
}

/// Reads a little-endian u16 at `offset`.
pub fn read_u16(buf: &[u8], offset: usize) -> ZipResult<u16> {
    let width = std::mem::size_of::<u16>();
    let mut int_bytes = [0u8; std::mem::size_of::<u16>()];
    int_bytes.copy_from_slice(bytes_at(buf, offset, width)?);
    Ok(u16::from_le_bytes(int_bytes))
}

/// Returns true if the four bytes at `offset` are the given signature.
/// Out-of-bounds offsets are simply not a match.
pub fn has_signature(buf: &[u8], offset: usize, signature: u32) -> bool {
    read_u32(buf, offset).map_or(false, |s| s == signature)
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// A packed MS-DOS time and date pair, as found in ZIP headers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    pub fn seconds(self) -> u32 {
        // MSDOS uses 2-second precision
        (0b0000_0000_0001_1111 & self.time) as u32 * 2
    }

    pub fn minutes(self) -> u32 {
        (0b0000_0111_1110_0000 & self.time) as u32 >> 5
    }

    pub fn hours(self) -> u32 {
        (0b1111_1000_0000_0000 & self.time) as u32 >> 11
    }

    pub fn day(self) -> u32 {
        (0b0000_0000_0001_1111 & self.date) as u32
    }

    pub fn month(self) -> u32 {
        (0b0000_0001_1110_0000 & self.date) as u32 >> 5
    }

    pub fn year(self) -> i32 {
        // MSDOS uses years since 1980; Always interpreted as a positive value
        ((0b1111_1110_0000_0000 & self.date) >> 9) as i32 + 1980
    }

    /// Returns `None` for the nonsense dates some archivers write
    /// (month zero, 30th of February, ...).
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year(), self.month(), self.day())?.and_hms_opt(
            self.hours(),
            self.minutes(),
            self.seconds(),
        )
    }
}

/// Formats as `YYYY-MM-DD HH:MM:SS` straight from the packed fields,
/// whether or not they name a real moment.
impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hours(),
            self.minutes(),
            self.seconds()
        )
    }
}
