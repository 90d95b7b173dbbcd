//! Defect ledger: per-group record of structural defects found during
//! validation, consumed later by the bitmap-rebuild stage.
//!
//! The ledger lives for one check cycle. A restart discards it and
//! starts a fresh one, so revalidation never double-counts.

use rfsck_types::GroupNumber;

/// Which per-group metadata structure was found out of place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectKind {
    BlockBitmap,
    InodeBitmap,
    InodeTable,
}

/// Per-group defect counters plus a running total.
#[derive(Debug)]
pub struct DefectLedger {
    invalid_block_bitmap: Vec<u32>,
    invalid_inode_bitmap: Vec<u32>,
    invalid_inode_table: Vec<u32>,
    invalid_bitmaps: u32,
}

impl DefectLedger {
    /// Fresh ledger with all counters zero, sized for `groups` groups.
    #[must_use]
    pub fn new(groups: u32) -> Self {
        let groups = groups as usize;
        Self {
            invalid_block_bitmap: vec![0; groups],
            invalid_inode_bitmap: vec![0; groups],
            invalid_inode_table: vec![0; groups],
            invalid_bitmaps: 0,
        }
    }

    /// Record one defect of `kind` in `group`.
    ///
    /// Any recorded kind also bumps the combined total; the rebuild
    /// stage keys off that total to decide whether it has work at all.
    pub fn record(&mut self, kind: DefectKind, group: GroupNumber) {
        let idx = group.0 as usize;
        match kind {
            DefectKind::BlockBitmap => self.invalid_block_bitmap[idx] += 1,
            DefectKind::InodeBitmap => self.invalid_inode_bitmap[idx] += 1,
            DefectKind::InodeTable => self.invalid_inode_table[idx] += 1,
        }
        self.invalid_bitmaps += 1;
    }

    /// Defect count of `kind` recorded against `group`.
    #[must_use]
    pub fn count(&self, kind: DefectKind, group: GroupNumber) -> u32 {
        let idx = group.0 as usize;
        match kind {
            DefectKind::BlockBitmap => self.invalid_block_bitmap[idx],
            DefectKind::InodeBitmap => self.invalid_inode_bitmap[idx],
            DefectKind::InodeTable => self.invalid_inode_table[idx],
        }
    }

    /// Combined defect total across all groups and kinds.
    #[must_use]
    pub fn invalid_bitmaps(&self) -> u32 {
        self.invalid_bitmaps
    }

    /// Whether any defect was recorded this cycle.
    #[must_use]
    pub fn has_defects(&self) -> bool {
        self.invalid_bitmaps > 0
    }

    /// Groups with at least one defect of `kind`, in ascending order.
    pub fn groups_with(&self, kind: DefectKind) -> impl Iterator<Item = GroupNumber> + '_ {
        let counts = match kind {
            DefectKind::BlockBitmap => &self.invalid_block_bitmap,
            DefectKind::InodeBitmap => &self.invalid_inode_bitmap,
            DefectKind::InodeTable => &self.invalid_inode_table,
        };
        counts
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .map(|(g, _)| GroupNumber(g as u32))
    }
}
