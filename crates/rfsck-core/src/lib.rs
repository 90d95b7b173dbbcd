#![forbid(unsafe_code)]
//! Filesystem image handle.
//!
//! [`FsImage`] is the open, mutable, in-memory-cached view of an image's
//! superblock and group-descriptor table. One check cycle owns exactly
//! one `FsImage`; a restart closes it and opens a fresh one. All other
//! components borrow it.

use rfsck_block::{ByteDevice, FileByteDevice};
use rfsck_error::{FsckError, OpenError, Result};
use rfsck_ondisk::{GroupDesc, Superblock};
use rfsck_types::{BlockNumber, GROUP_DESC_SIZE, GroupNumber, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Open, cached view of one filesystem image.
pub struct FsImage {
    device: Box<dyn ByteDevice>,
    device_name: String,
    superblock: Superblock,
    raw_super: Vec<u8>,
    super_offset: u64,
    block_size: u32,
    groups: Vec<GroupDesc>,
    raw_groups: Vec<u8>,
    groups_offset: u64,
    super_dirty: bool,
    groups_dirty: bool,
    changed: bool,
    valid: bool,
}

// The device box has no useful Debug form; summarize the cached view.
impl fmt::Debug for FsImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsImage")
            .field("device_name", &self.device_name)
            .field("block_size", &self.block_size)
            .field("groups", &self.groups.len())
            .field("super_dirty", &self.super_dirty)
            .field("groups_dirty", &self.groups_dirty)
            .field("changed", &self.changed)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}

impl FsImage {
    /// Open the image on an already-opened device.
    ///
    /// `superblock` selects an alternate superblock location in blocks
    /// of `block_size` bytes; both must be given together (the
    /// orchestrator's fallback search supplies candidate sizes). With
    /// neither, the primary superblock at byte 1024 is used and the
    /// block size comes from the superblock itself.
    pub fn open(
        device: Box<dyn ByteDevice>,
        device_name: impl Into<String>,
        superblock: Option<BlockNumber>,
        block_size: Option<u32>,
    ) -> std::result::Result<Self, OpenError> {
        let device_name = device_name.into();

        let super_offset = match (superblock, block_size) {
            (Some(sb_block), Some(bs)) => sb_block
                .to_byte_offset(bs)
                .ok_or_else(|| OpenError::Unclassified("superblock offset overflow".into()))?,
            (None, _) => SUPERBLOCK_OFFSET,
            (Some(_), None) => {
                return Err(OpenError::Unclassified(
                    "alternate superblock requires a block size".into(),
                ));
            }
        };

        let mut raw_super = vec![0_u8; SUPERBLOCK_SIZE];
        device
            .read_exact_at(super_offset, &mut raw_super)
            .map_err(classify_read_failure)?;

        let sb = Superblock::parse_region(&raw_super)
            .map_err(|err| OpenError::Unclassified(err.to_string()))?;

        if !sb.revision_supported() {
            return Err(OpenError::RevisionTooHigh);
        }

        let Some(sb_block_size) = sb.block_size() else {
            return Err(OpenError::Unclassified(
                "superblock encodes an invalid block size".into(),
            ));
        };
        if let Some(requested) = block_size
            && requested != sb_block_size
        {
            return Err(OpenError::Unclassified(format!(
                "superblock block size {sb_block_size} does not match requested {requested}"
            )));
        }

        // The descriptor table follows the superblock's block group copy:
        // the block right after an explicitly-given superblock location,
        // or right after the first data block for the primary.
        let groups_block = match superblock {
            Some(sb_block) => sb_block
                .checked_add(1)
                .ok_or_else(|| OpenError::Unclassified("descriptor table offset overflow".into()))?,
            None => sb.group_desc_block(),
        };
        let groups_offset = groups_block
            .to_byte_offset(sb_block_size)
            .ok_or_else(|| OpenError::Unclassified("descriptor table offset overflow".into()))?;

        let groups_count = sb.groups_count() as usize;
        let mut raw_groups = vec![0_u8; groups_count * GROUP_DESC_SIZE];
        device
            .read_exact_at(groups_offset, &mut raw_groups)
            .map_err(classify_read_failure)?;
        let groups = GroupDesc::parse_table(&raw_groups, sb.groups_count())
            .map_err(|err| OpenError::Unclassified(err.to_string()))?;

        debug!(
            device = %device_name,
            block_size = sb_block_size,
            groups = groups_count,
            "opened filesystem image"
        );

        // Write-back always targets the primary copies: opening through
        // a backup superblock exists to restore a damaged primary.
        let primary_groups_offset = sb
            .group_desc_block()
            .to_byte_offset(sb_block_size)
            .ok_or_else(|| OpenError::Unclassified("descriptor table offset overflow".into()))?;

        let valid = sb.state_valid();
        Ok(Self {
            device,
            device_name,
            superblock: sb,
            raw_super,
            super_offset: SUPERBLOCK_OFFSET,
            block_size: sb_block_size,
            groups,
            raw_groups,
            groups_offset: primary_groups_offset,
            super_dirty: false,
            groups_dirty: false,
            changed: false,
            valid,
        })
    }

    /// Open the image file at `path`, classifying the failure.
    pub fn open_path(
        path: &Path,
        writable: bool,
        superblock: Option<BlockNumber>,
        block_size: Option<u32>,
    ) -> std::result::Result<Self, OpenError> {
        let device = FileByteDevice::open(path, writable).map_err(|err| OpenError::from_io(&err))?;
        Self::open(
            Box::new(device),
            path.display().to_string(),
            superblock,
            block_size,
        )
    }

    #[must_use]
    pub fn device(&self) -> &dyn ByteDevice {
        self.device.as_ref()
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.device.writable()
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Mutate the superblock and mark it dirty.
    pub fn superblock_mut(&mut self) -> &mut Superblock {
        self.mark_super_dirty();
        &mut self.superblock
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupDesc] {
        &self.groups
    }

    #[must_use]
    pub fn groups_count(&self) -> u32 {
        self.groups.len() as u32
    }

    /// Replace one group descriptor, marking the table dirty and the
    /// image changed.
    pub fn set_group(&mut self, group: GroupNumber, desc: GroupDesc) {
        self.groups[group.0 as usize] = desc;
        self.groups_dirty = true;
        self.changed = true;
    }

    /// Mark the in-memory superblock as needing write-out on close.
    pub fn mark_super_dirty(&mut self) {
        self.super_dirty = true;
        self.changed = true;
    }

    /// Record that some metadata was altered this cycle.
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Whether any metadata was altered this cycle.
    #[must_use]
    pub fn test_changed(&self) -> bool {
        self.changed
    }

    /// Set or clear the in-memory validity flag. Persisted into the
    /// superblock state only at close time, by the orchestrator.
    pub fn mark_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Whether no uncorrected inconsistency is known.
    #[must_use]
    pub fn test_valid(&self) -> bool {
        self.valid
    }

    /// Write dirty metadata back (writable images only) and flush.
    ///
    /// Dirty regions land at the primary superblock and descriptor
    /// locations even when the image was opened through a backup copy,
    /// so a backup-assisted run repairs the primary.
    ///
    /// Storage is flushed twice with a settle pause between flushes, in
    /// case the kernel reorders asynchronous write-back. Tests pass
    /// `Duration::ZERO`.
    pub fn close(mut self, settle: Duration) -> Result<()> {
        if self.writable() && (self.super_dirty || self.groups_dirty) {
            if self.super_dirty {
                self.superblock
                    .write_region(&mut self.raw_super)
                    .map_err(|err| FsckError::Resource(err.to_string()))?;
                self.device.write_all_at(self.super_offset, &self.raw_super)?;
            }
            if self.groups_dirty {
                GroupDesc::write_table(&self.groups, &mut self.raw_groups)
                    .map_err(|err| FsckError::Resource(err.to_string()))?;
                self.device
                    .write_all_at(self.groups_offset, &self.raw_groups)?;
            }
            debug!(device = %self.device_name, "wrote back dirty metadata");
        }
        self.device.sync()?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        self.device.sync()?;
        Ok(())
    }

    /// Discard the handle without persisting anything (clean-skip exit).
    pub fn discard(self) {}
}

/// A failed superblock/descriptor read means either a truncated image
/// or an unclassifiable I/O problem.
fn classify_read_failure(err: FsckError) -> OpenError {
    match err {
        FsckError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => OpenError::ShortRead,
        other => OpenError::Unclassified(other.to_string()),
    }
}
