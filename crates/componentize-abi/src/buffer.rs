//! Buffer read/write helpers shared by the memory model.

use crate::AbiError;

/// Align a value up to the nearest multiple of alignment.
#[inline]
pub fn align_to(val: usize, align: usize) -> usize {
    if align <= 1 {
        return val;
    }
    (val + align - 1) & !(align - 1)
}

/// Safe buffer slice read helper - returns error instead of panicking.
#[inline]
pub fn read_slice(buffer: &[u8], start: usize, len: usize) -> Result<&[u8], AbiError> {
    let buf_len = buffer.len();
    buffer
        .get(start..start + len)
        .ok_or(AbiError::BufferTooSmall {
            needed: start + len,
            available: buf_len,
        })
}

/// Safe buffer slice write helper.
#[inline]
pub fn write_slice(buffer: &mut [u8], start: usize, data: &[u8]) -> Result<(), AbiError> {
    let end = start + data.len();
    let len = buffer.len();
    buffer
        .get_mut(start..end)
        .ok_or(AbiError::BufferTooSmall {
            needed: end,
            available: len,
        })?
        .copy_from_slice(data);
    Ok(())
}

/// Read a fixed-size little-endian array.
#[inline]
pub fn read_array<const N: usize>(buffer: &[u8], start: usize) -> Result<[u8; N], AbiError> {
    read_slice(buffer, start, N)?
        .try_into()
        .map_err(|_| AbiError::BufferTooSmall {
            needed: start + N,
            available: buffer.len(),
        })
}
