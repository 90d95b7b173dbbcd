#![forbid(unsafe_code)]

use rfsck_types::{
    BlockNumber, DYNAMIC_REV, EXT2_SUPER_MAGIC, GOOD_OLD_REV, GROUP_DESC_SIZE, INODE_SIZE,
    ParseError, STATE_ERROR_FS, STATE_VALID_FS, SUPERBLOCK_SIZE, ensure_slice, read_le_u16,
    read_le_u32, size_from_log, write_le_u16, write_le_u32,
};
use serde::{Deserialize, Serialize};

// Field offsets within the 1024-byte superblock region.
const SB_INODES_COUNT: usize = 0x00;
const SB_BLOCKS_COUNT: usize = 0x04;
const SB_R_BLOCKS_COUNT: usize = 0x08;
const SB_FREE_BLOCKS_COUNT: usize = 0x0C;
const SB_FREE_INODES_COUNT: usize = 0x10;
const SB_FIRST_DATA_BLOCK: usize = 0x14;
const SB_LOG_BLOCK_SIZE: usize = 0x18;
const SB_LOG_FRAG_SIZE: usize = 0x1C;
const SB_BLOCKS_PER_GROUP: usize = 0x20;
const SB_FRAGS_PER_GROUP: usize = 0x24;
const SB_INODES_PER_GROUP: usize = 0x28;
const SB_MTIME: usize = 0x2C;
const SB_WTIME: usize = 0x30;
const SB_MNT_COUNT: usize = 0x34;
const SB_MAX_MNT_COUNT: usize = 0x36;
const SB_MAGIC: usize = 0x38;
const SB_STATE: usize = 0x3A;
const SB_ERRORS: usize = 0x3C;
const SB_MINOR_REV_LEVEL: usize = 0x3E;
const SB_LASTCHECK: usize = 0x40;
const SB_CHECKINTERVAL: usize = 0x44;
const SB_CREATOR_OS: usize = 0x48;
const SB_REV_LEVEL: usize = 0x4C;
const SB_FIRST_INO: usize = 0x54;
const SB_INODE_SIZE: usize = 0x58;

// Field offsets within a 32-byte group descriptor.
const GD_BLOCK_BITMAP: usize = 0x00;
const GD_INODE_BITMAP: usize = 0x04;
const GD_INODE_TABLE: usize = 0x08;
const GD_FREE_BLOCKS_COUNT: usize = 0x0C;
const GD_FREE_INODES_COUNT: usize = 0x0E;
const GD_USED_DIRS_COUNT: usize = 0x10;

/// Parsed ext2 superblock: the global scalar fields the checker reads
/// and (for a writable image) patches back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,

    // ── State & check bookkeeping ────────────────────────────────────────
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,

    // ── Revision & OS ────────────────────────────────────────────────────
    pub creator_os: u32,
    pub rev_level: u32,
    pub first_ino: u32,
    pub inode_size: u16,
}

impl Superblock {
    /// Parse a superblock from a 1024-byte region.
    ///
    /// Only the magic is verified here; range validation of the other
    /// fields is the consistency checker's job, and a checker that
    /// refused to parse out-of-range fields could never diagnose them.
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, SB_MAGIC)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: EXT2_SUPER_MAGIC,
                actual: magic,
            });
        }

        Ok(Self {
            inodes_count: read_le_u32(region, SB_INODES_COUNT)?,
            blocks_count: read_le_u32(region, SB_BLOCKS_COUNT)?,
            r_blocks_count: read_le_u32(region, SB_R_BLOCKS_COUNT)?,
            free_blocks_count: read_le_u32(region, SB_FREE_BLOCKS_COUNT)?,
            free_inodes_count: read_le_u32(region, SB_FREE_INODES_COUNT)?,
            first_data_block: read_le_u32(region, SB_FIRST_DATA_BLOCK)?,
            log_block_size: read_le_u32(region, SB_LOG_BLOCK_SIZE)?,
            log_frag_size: read_le_u32(region, SB_LOG_FRAG_SIZE)?,
            blocks_per_group: read_le_u32(region, SB_BLOCKS_PER_GROUP)?,
            frags_per_group: read_le_u32(region, SB_FRAGS_PER_GROUP)?,
            inodes_per_group: read_le_u32(region, SB_INODES_PER_GROUP)?,
            mtime: read_le_u32(region, SB_MTIME)?,
            wtime: read_le_u32(region, SB_WTIME)?,
            mnt_count: read_le_u16(region, SB_MNT_COUNT)?,
            max_mnt_count: read_le_u16(region, SB_MAX_MNT_COUNT)?,
            magic,
            state: read_le_u16(region, SB_STATE)?,
            errors: read_le_u16(region, SB_ERRORS)?,
            minor_rev_level: read_le_u16(region, SB_MINOR_REV_LEVEL)?,
            lastcheck: read_le_u32(region, SB_LASTCHECK)?,
            checkinterval: read_le_u32(region, SB_CHECKINTERVAL)?,
            creator_os: read_le_u32(region, SB_CREATOR_OS)?,
            rev_level: read_le_u32(region, SB_REV_LEVEL)?,
            first_ino: read_le_u32(region, SB_FIRST_INO)?,
            inode_size: read_le_u16(region, SB_INODE_SIZE)?,
        })
    }

    /// Patch every modeled field back into a raw superblock region.
    ///
    /// Bytes the checker does not model (UUID, volume name, reserved
    /// areas) are left untouched, so a parse → modify → write cycle
    /// preserves them. `region` must be at least [`SUPERBLOCK_SIZE`]
    /// bytes; callers hold the same buffer they parsed from.
    pub fn write_region(&self, region: &mut [u8]) -> Result<(), ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        write_le_u32(region, SB_INODES_COUNT, self.inodes_count);
        write_le_u32(region, SB_BLOCKS_COUNT, self.blocks_count);
        write_le_u32(region, SB_R_BLOCKS_COUNT, self.r_blocks_count);
        write_le_u32(region, SB_FREE_BLOCKS_COUNT, self.free_blocks_count);
        write_le_u32(region, SB_FREE_INODES_COUNT, self.free_inodes_count);
        write_le_u32(region, SB_FIRST_DATA_BLOCK, self.first_data_block);
        write_le_u32(region, SB_LOG_BLOCK_SIZE, self.log_block_size);
        write_le_u32(region, SB_LOG_FRAG_SIZE, self.log_frag_size);
        write_le_u32(region, SB_BLOCKS_PER_GROUP, self.blocks_per_group);
        write_le_u32(region, SB_FRAGS_PER_GROUP, self.frags_per_group);
        write_le_u32(region, SB_INODES_PER_GROUP, self.inodes_per_group);
        write_le_u32(region, SB_MTIME, self.mtime);
        write_le_u32(region, SB_WTIME, self.wtime);
        write_le_u16(region, SB_MNT_COUNT, self.mnt_count);
        write_le_u16(region, SB_MAX_MNT_COUNT, self.max_mnt_count);
        write_le_u16(region, SB_MAGIC, self.magic);
        write_le_u16(region, SB_STATE, self.state);
        write_le_u16(region, SB_ERRORS, self.errors);
        write_le_u16(region, SB_MINOR_REV_LEVEL, self.minor_rev_level);
        write_le_u32(region, SB_LASTCHECK, self.lastcheck);
        write_le_u32(region, SB_CHECKINTERVAL, self.checkinterval);
        write_le_u32(region, SB_CREATOR_OS, self.creator_os);
        write_le_u32(region, SB_REV_LEVEL, self.rev_level);
        write_le_u32(region, SB_FIRST_INO, self.first_ino);
        write_le_u16(region, SB_INODE_SIZE, self.inode_size);
        Ok(())
    }

    /// Block size in bytes, `None` when `log_block_size` is nonsense.
    #[must_use]
    pub fn block_size(&self) -> Option<u32> {
        size_from_log(self.log_block_size)
    }

    /// Fragment size in bytes, `None` when `log_frag_size` is nonsense.
    #[must_use]
    pub fn frag_size(&self) -> Option<u32> {
        size_from_log(self.log_frag_size)
    }

    /// On-disk inode record size: fixed at 128 for rev 0, per-superblock
    /// for the dynamic revision.
    #[must_use]
    pub fn inode_record_size(&self) -> u32 {
        if self.rev_level == GOOD_OLD_REV {
            INODE_SIZE
        } else {
            u32::from(self.inode_size)
        }
    }

    /// Number of block groups described by this superblock.
    #[must_use]
    pub fn groups_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        let data_blocks =
            u64::from(self.blocks_count).saturating_sub(u64::from(self.first_data_block));
        u32::try_from(data_blocks.div_ceil(u64::from(self.blocks_per_group))).unwrap_or(u32::MAX)
    }

    /// Blocks occupied by one group's inode table.
    ///
    /// Returns `None` when the block size is invalid; the caller is
    /// expected to have range-checked `log_block_size` first.
    #[must_use]
    pub fn inode_blocks_per_group(&self) -> Option<u32> {
        let block_size = u64::from(self.block_size()?);
        let table_bytes =
            u64::from(self.inodes_per_group) * u64::from(self.inode_record_size());
        u32::try_from(table_bytes.div_ceil(block_size)).ok()
    }

    /// Block holding the start of the group descriptor table.
    #[must_use]
    pub fn group_desc_block(&self) -> BlockNumber {
        BlockNumber(self.first_data_block.saturating_add(1))
    }

    #[must_use]
    pub fn state_valid(&self) -> bool {
        self.state & STATE_VALID_FS != 0
    }

    #[must_use]
    pub fn state_error(&self) -> bool {
        self.state & STATE_ERROR_FS != 0
    }

    pub fn set_state_valid(&mut self, valid: bool) {
        if valid {
            self.state |= STATE_VALID_FS;
        } else {
            self.state &= !STATE_VALID_FS;
        }
    }

    /// Whether this image's revision is one the checker understands.
    #[must_use]
    pub fn revision_supported(&self) -> bool {
        self.rev_level <= DYNAMIC_REV
    }
}

/// One per-group descriptor record: where the group's bitmaps and inode
/// table live, plus the free counts the statistics report reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDesc {
    pub block_bitmap: BlockNumber,
    pub inode_bitmap: BlockNumber,
    pub inode_table: BlockNumber,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    /// Parse one descriptor from a 32-byte record.
    pub fn parse_record(record: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(record, 0, GROUP_DESC_SIZE)?;
        Ok(Self {
            block_bitmap: BlockNumber(read_le_u32(record, GD_BLOCK_BITMAP)?),
            inode_bitmap: BlockNumber(read_le_u32(record, GD_INODE_BITMAP)?),
            inode_table: BlockNumber(read_le_u32(record, GD_INODE_TABLE)?),
            free_blocks_count: read_le_u16(record, GD_FREE_BLOCKS_COUNT)?,
            free_inodes_count: read_le_u16(record, GD_FREE_INODES_COUNT)?,
            used_dirs_count: read_le_u16(record, GD_USED_DIRS_COUNT)?,
        })
    }

    /// Patch this descriptor into its 32-byte record.
    pub fn write_record(&self, record: &mut [u8]) -> Result<(), ParseError> {
        ensure_slice(record, 0, GROUP_DESC_SIZE)?;
        write_le_u32(record, GD_BLOCK_BITMAP, self.block_bitmap.0);
        write_le_u32(record, GD_INODE_BITMAP, self.inode_bitmap.0);
        write_le_u32(record, GD_INODE_TABLE, self.inode_table.0);
        write_le_u16(record, GD_FREE_BLOCKS_COUNT, self.free_blocks_count);
        write_le_u16(record, GD_FREE_INODES_COUNT, self.free_inodes_count);
        write_le_u16(record, GD_USED_DIRS_COUNT, self.used_dirs_count);
        Ok(())
    }

    /// Parse a descriptor table covering `count` groups.
    pub fn parse_table(data: &[u8], count: u32) -> Result<Vec<Self>, ParseError> {
        let count = count as usize;
        let needed = count * GROUP_DESC_SIZE;
        ensure_slice(data, 0, needed)?;
        (0..count)
            .map(|i| Self::parse_record(&data[i * GROUP_DESC_SIZE..(i + 1) * GROUP_DESC_SIZE]))
            .collect()
    }

    /// Patch a whole descriptor table back into its raw bytes.
    pub fn write_table(table: &[Self], data: &mut [u8]) -> Result<(), ParseError> {
        let needed = table.len() * GROUP_DESC_SIZE;
        ensure_slice(data, 0, needed)?;
        for (i, desc) in table.iter().enumerate() {
            desc.write_record(&mut data[i * GROUP_DESC_SIZE..(i + 1) * GROUP_DESC_SIZE])?;
        }
        Ok(())
    }
}
