#![forbid(unsafe_code)]
//! Core numeric newtypes and raw-field helpers shared by every rfsck crate.
//!
//! Block addresses and group indices are both 32-bit on disk in the
//! ext2-style format this checker understands, so the newtypes here wrap
//! `u32` and exist purely to stop blocks and groups from being mixed up
//! in arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Byte offset of the primary superblock from the start of the image.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// Size of the on-disk superblock region in bytes.
pub const SUPERBLOCK_SIZE: usize = 1024;
/// ext2 superblock magic (`s_magic`).
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Size of one on-disk group descriptor in bytes.
pub const GROUP_DESC_SIZE: usize = 32;

/// On-disk inode record size for rev-0 filesystems.
pub const INODE_SIZE: u32 = 128;

/// `s_state` bit: filesystem was cleanly unmounted.
pub const STATE_VALID_FS: u16 = 0x0001;
/// `s_state` bit: filesystem has recorded errors.
pub const STATE_ERROR_FS: u16 = 0x0002;

/// Original revision (`s_rev_level`).
pub const GOOD_OLD_REV: u32 = 0;
/// Revision with dynamic inode sizes (`s_rev_level`); the highest this
/// checker understands.
pub const DYNAMIC_REV: u32 = 1;

/// Physical block address (u32 on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

impl BlockNumber {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u32) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Byte offset of this block at the given block size.
    ///
    /// Returns `None` on overflow (cannot happen for real u32 block
    /// addresses at supported block sizes, but the arithmetic stays
    /// checked anyway).
    #[must_use]
    pub fn to_byte_offset(self, block_size: u32) -> Option<u64> {
        u64::from(self.0).checked_mul(u64::from(block_size))
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while decoding on-disk metadata regions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u16, actual: u16 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Patch a little-endian u16 into a raw region.
///
/// Panics in debug builds if the offset is out of range; callers patch
/// regions whose size they already validated at parse time.
#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Patch a little-endian u32 into a raw region.
#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Decode `s_log_block_size` (or `s_log_frag_size`) into a byte size.
///
/// The on-disk field is a shift relative to 1024. Returns `None` for
/// shifts that overflow u32.
#[must_use]
pub fn size_from_log(log_size: u32) -> Option<u32> {
    1024_u32.checked_shl(log_size)
}
