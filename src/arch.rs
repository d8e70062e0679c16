use crate::result::*;

/// A checked cast from u64 to usize
///
/// We could use the `cast` crate,
/// (https://docs.rs/cast/0.2.3/cast/)
/// but this is the only one we really need.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}

/// Adds a field width to an offset, failing instead of wrapping.
pub fn end_of(offset: usize, width: usize) -> ZipResult<usize> {
    offset
        .checked_add(width)
        .ok_or(ZipError::Truncated("Offset overflows the address space"))
}
