//! Inflate and deflate, both for archive entries and for arbitrary blobs.
//!
//! Entries are decoded in one shot into a buffer of their declared size.
//! The standalone functions don't know how big their output will be,
//! so they grow their buffers until the stream ends.

use std::borrow::Cow;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use log::*;

use crate::arch::end_of;
use crate::read::CompressionMethod;
use crate::result::*;

/// Compression level used when the caller doesn't give one
pub const DEFAULT_LEVEL: i64 = 9;

/// Smallest amount we grow an output buffer by
const MIN_GROWTH: usize = 256;

/// Deflate's best case: a 258-byte match in two bits, plus block overhead.
const MAX_INFLATE_RATIO: usize = 1032;

/// Decodes the payload of an archive entry.
///
/// Stored payloads are handed back as-is.
/// Deflated ones must inflate to exactly `size` bytes.
pub fn decode_entry(
    method: CompressionMethod,
    payload: &[u8],
    size: usize,
) -> ZipResult<Cow<'_, [u8]>> {
    match method {
        CompressionMethod::None => Ok(Cow::Borrowed(payload)),
        CompressionMethod::Deflate => inflate_exact(payload, size).map(Cow::Owned),
        CompressionMethod::Unsupported(code) => Err(ZipError::UnsupportedMethod(code)),
    }
}

/// Raw-inflates `input`, which should decode to exactly `size` bytes.
fn inflate_exact(input: &[u8], size: usize) -> ZipResult<Vec<u8>> {
    // The declared size comes from the archive; don't allocate for a lie.
    let reachable = input
        .len()
        .saturating_mul(MAX_INFLATE_RATIO)
        .saturating_add(64);
    if size > reachable {
        debug!(
            "{} bytes can't inflate to the declared {} bytes",
            input.len(),
            size
        );
        return Err(ZipError::Inflate);
    }

    let mut output = Vec::new();
    // One byte of slack so a stream that overshoots its declared size
    // shows up as a length mismatch instead of a full buffer.
    output.try_reserve_exact(end_of(size, 1)?)?;

    let mut inflater = Decompress::new(false);
    let status = inflater
        .decompress_vec(input, &mut output, FlushDecompress::Finish)
        .map_err(|e| {
            debug!("Inflate failed: {}", e);
            ZipError::Inflate
        })?;
    let input_exhausted = inflater.total_in() == input.len() as u64;

    let finished = match status {
        Status::StreamEnd => true,
        Status::Ok => input_exhausted,
        Status::BufError => false,
    };
    if !finished || output.len() != size {
        debug!(
            "Inflate stopped at {:?} with {} of {} bytes in, {} of {} bytes out",
            status,
            inflater.total_in(),
            input.len(),
            output.len(),
            size
        );
        return Err(ZipError::Inflate);
    }
    Ok(output)
}

/// Raw-inflates `input` (no zlib or gzip wrapper).
pub fn inflate(input: &[u8]) -> ZipResult<Vec<u8>> {
    inflate_growing(input, false)
}

/// Inflates a zlib-wrapped stream, as made by [`compress`].
/// Raw streams go through [`inflate`] instead.
///
/// [`inflate`]: fn.inflate.html
/// [`compress`]: fn.compress.html
pub fn uncompress(input: &[u8]) -> ZipResult<Vec<u8>> {
    inflate_growing(input, true)
}

fn inflate_growing(input: &[u8], zlib_header: bool) -> ZipResult<Vec<u8>> {
    let growth = input.len().max(MIN_GROWTH);
    let mut output = Vec::new();
    output.try_reserve_exact(growth)?;

    let mut inflater = Decompress::new(zlib_header);
    loop {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let status = inflater
            .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Sync)
            .map_err(|e| {
                debug!("Inflate failed: {}", e);
                ZipError::Inflate
            })?;
        let input_exhausted = inflater.total_in() as usize == input.len();
        let has_room = output.len() < output.capacity();
        let progressed =
            inflater.total_in() as usize != consumed || inflater.total_out() != produced;

        match status {
            Status::StreamEnd => return Ok(output),
            Status::Ok | Status::BufError if input_exhausted && has_room => return Ok(output),
            Status::Ok | Status::BufError if !has_room => output.try_reserve_exact(growth)?,
            Status::Ok | Status::BufError if progressed => {}
            _ => return Err(ZipError::Inflate),
        }
    }
}

/// Raw-deflates `input` (no zlib or gzip wrapper), as ZIP entries are stored.
pub fn deflate(input: &[u8], level: i64) -> ZipResult<Vec<u8>> {
    deflate_growing(input, compression_level(level)?, false)
}

/// Deflates `input` with a zlib wrapper.
pub fn compress(input: &[u8], level: i64) -> ZipResult<Vec<u8>> {
    deflate_growing(input, compression_level(level)?, true)
}

/// Checks that `level` is one zlib understands (0 through 9).
pub fn compression_level(level: i64) -> ZipResult<Compression> {
    match u32::try_from(level) {
        Ok(l) if l <= 9 => Ok(Compression::new(l)),
        _ => Err(ZipError::InvalidLevel(level)),
    }
}

/// A guess at the compressed size that's right nearly always;
/// we grow the buffer for the cases it isn't.
fn deflate_bound(len: usize) -> usize {
    len.saturating_add(len >> 12)
        .saturating_add(len >> 14)
        .saturating_add(len >> 25)
        .saturating_add(13)
}

fn deflate_growing(input: &[u8], level: Compression, zlib_header: bool) -> ZipResult<Vec<u8>> {
    let growth = (input.len() / 4).max(MIN_GROWTH);
    let mut output = Vec::new();
    output.try_reserve_exact(deflate_bound(input.len()))?;

    let mut deflater = Compress::new(level, zlib_header);
    loop {
        let consumed = deflater.total_in() as usize;
        let produced = deflater.total_out();
        let status = deflater
            .compress_vec(&input[consumed..], &mut output, FlushCompress::Finish)
            .map_err(|e| {
                debug!("Deflate failed: {}", e);
                ZipError::Deflate
            })?;
        let has_room = output.len() < output.capacity();
        let progressed =
            deflater.total_in() as usize != consumed || deflater.total_out() != produced;

        match status {
            Status::StreamEnd => return Ok(output),
            _ if !has_room => output.try_reserve_exact(growth)?,
            _ if progressed => {}
            _ => return Err(ZipError::Deflate),
        }
    }
}

/// The CRC-32 ZIP archives use
pub fn crc32(input: &[u8]) -> u32 {
    crc32fast::hash(input)
}
