//! Global-scope superblock validation and the group-descriptor window
//! walk.
//!
//! Superblock defects are unrepairable here: the run aborts and the
//! operator is pointed at a backup superblock. Group-descriptor defects
//! are repairable: a misplaced bitmap or inode table is zeroed (the
//! sentinel that tells the rebuild stage to reconstruct it) and recorded
//! in the defect ledger.

use crate::ledger::{DefectKind, DefectLedger};
use crate::policy::DecisionPolicy;
use rfsck_block::device_block_capacity;
use rfsck_core::FsImage;
use rfsck_error::{FsckError, Result};
use rfsck_types::{BlockNumber, GroupNumber};
use tracing::debug;

/// Which side(s) of a range a superblock field is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
    Both,
}

/// Check one superblock field against its legal range.
///
/// A violation is global corruption: the diagnostic names the field and
/// its value so the operator can judge whether a backup superblock is
/// worth trying.
pub fn check_super_value(
    field: &'static str,
    value: u64,
    bound: Bound,
    min: u64,
    max: u64,
) -> Result<()> {
    let below = matches!(bound, Bound::Min | Bound::Both) && value < min;
    let above = matches!(bound, Bound::Max | Bound::Both) && value > max;
    if below || above {
        return Err(FsckError::Corrupt {
            detail: format!("{field} = {value}"),
        });
    }
    Ok(())
}

/// Validates the superblock and group descriptors of one image.
///
/// Owns the one-shot relocation hint, which stays suppressed across a
/// restart: the operator saw it once, repeating it adds nothing.
pub struct SuperblockValidator<'a> {
    policy: &'a DecisionPolicy,
    relocate_hint_issued: bool,
}

impl<'a> SuperblockValidator<'a> {
    #[must_use]
    pub fn new(policy: &'a DecisionPolicy) -> Self {
        Self {
            policy,
            relocate_hint_issued: false,
        }
    }

    /// Run the full validation sequence: field ranges, device capacity,
    /// geometry cross-checks, then the per-group descriptor windows.
    ///
    /// Approved descriptor relocations mutate `img` and are recorded in
    /// `ledger`; a declined one is fatal.
    pub fn check(&mut self, img: &mut FsImage, ledger: &mut DefectLedger) -> Result<()> {
        let block_size = img.block_size();
        let bits_per_block = 8 * u64::from(block_size);
        let sb = img.superblock().clone();

        check_super_value("inodes_count", u64::from(sb.inodes_count), Bound::Min, 1, 0)?;
        check_super_value("blocks_count", u64::from(sb.blocks_count), Bound::Min, 1, 0)?;
        check_super_value(
            "first_data_block",
            u64::from(sb.first_data_block),
            Bound::Max,
            0,
            u64::from(sb.blocks_count),
        )?;
        check_super_value("log_frag_size", u64::from(sb.log_frag_size), Bound::Max, 0, 2)?;
        check_super_value(
            "log_block_size",
            u64::from(sb.log_block_size),
            Bound::Both,
            u64::from(sb.log_frag_size),
            2,
        )?;
        check_super_value(
            "frags_per_group",
            u64::from(sb.frags_per_group),
            Bound::Both,
            1,
            bits_per_block,
        )?;
        check_super_value(
            "blocks_per_group",
            u64::from(sb.blocks_per_group),
            Bound::Both,
            1,
            bits_per_block,
        )?;
        check_super_value(
            "inodes_per_group",
            u64::from(sb.inodes_per_group),
            Bound::Min,
            1,
            0,
        )?;
        check_super_value(
            "r_blocks_count",
            u64::from(sb.r_blocks_count),
            Bound::Max,
            0,
            u64::from(sb.blocks_count),
        )?;

        // The superblock's claimed size must fit the device underneath.
        // Either side could be the corrupt one, so let the operator call
        // it rather than guessing.
        let capacity = device_block_capacity(img.device(), block_size);
        if capacity < u64::from(sb.blocks_count) {
            println!(
                "The filesystem size (according to the superblock) is {} blocks",
                sb.blocks_count
            );
            println!("The physical size of the device is {capacity} blocks");
            println!("Either the superblock or the partition table is likely to be corrupt!");
            self.policy.preen_halt(img.device_name())?;
            if self.policy.ask("Abort", true)? {
                return Err(FsckError::Aborted(
                    "filesystem larger than its device".into(),
                ));
            }
        }

        if sb.frag_size() != sb.block_size() {
            println!(
                "This checker does not support fragment sizes different from the block size."
            );
            return Err(FsckError::Unsupported(
                "fragment size differs from block size".into(),
            ));
        }

        let should_be = sb.frags_per_group / (sb.log_block_size - sb.log_frag_size + 1);
        if sb.blocks_per_group != should_be {
            return Err(FsckError::Corrupt {
                detail: format!(
                    "blocks_per_group = {}, should have been {should_be}",
                    sb.blocks_per_group
                ),
            });
        }

        let should_be = u32::from(block_size == 1024);
        if sb.first_data_block != should_be {
            return Err(FsckError::Corrupt {
                detail: format!(
                    "first_data_block = {}, should have been {should_be}",
                    sb.first_data_block
                ),
            });
        }

        let Some(inode_blocks) = sb.inode_blocks_per_group() else {
            return Err(FsckError::Corrupt {
                detail: format!(
                    "inodes_per_group = {} (inode table would overflow)",
                    sb.inodes_per_group
                ),
            });
        };

        // Descriptor windows. Each group's metadata must sit inside that
        // group's block range; the last window is clamped to the end of
        // the filesystem.
        let groups_count = img.groups_count();
        let blocks_per_group = u64::from(sb.blocks_per_group);
        let mut first_block = u64::from(sb.first_data_block);
        let mut last_block = first_block + blocks_per_group;
        for i in 0..groups_count {
            let group = GroupNumber(i);
            if i == groups_count - 1 {
                last_block = u64::from(sb.blocks_count);
            }
            let mut desc = img.groups()[i as usize];
            let mut relocated = false;

            let block = u64::from(desc.block_bitmap.0);
            if block < first_block || block >= last_block {
                self.relocate_hint();
                println!("Block bitmap for group {group} is not in group.  (block {block})");
                self.policy.preen_halt(img.device_name())?;
                if self.policy.ask("Relocate", true)? {
                    desc.block_bitmap = BlockNumber(0);
                    relocated = true;
                    ledger.record(DefectKind::BlockBitmap, group);
                } else {
                    return Err(FsckError::RepairDeclined {
                        structure: "block bitmap",
                        group: i,
                    });
                }
            }

            let block = u64::from(desc.inode_bitmap.0);
            if block < first_block || block >= last_block {
                self.relocate_hint();
                println!("Inode bitmap for group {group} is not in group.  (block {block})");
                self.policy.preen_halt(img.device_name())?;
                if self.policy.ask("Relocate", true)? {
                    desc.inode_bitmap = BlockNumber(0);
                    relocated = true;
                    ledger.record(DefectKind::InodeBitmap, group);
                } else {
                    return Err(FsckError::RepairDeclined {
                        structure: "inode bitmap",
                        group: i,
                    });
                }
            }

            // The inode table spans several blocks; the whole span must
            // fit. Losing it loses file data, hence the louder warning.
            let block = u64::from(desc.inode_table.0);
            if block < first_block || block + u64::from(inode_blocks) - 1 >= last_block {
                self.relocate_hint();
                println!("Inode table for group {group} is not in group.  (block {block})");
                println!("WARNING: SEVERE DATA LOSS POSSIBLE.");
                self.policy.preen_halt(img.device_name())?;
                if self.policy.ask("Relocate", true)? {
                    desc.inode_table = BlockNumber(0);
                    relocated = true;
                    ledger.record(DefectKind::InodeTable, group);
                } else {
                    return Err(FsckError::RepairDeclined {
                        structure: "inode table",
                        group: i,
                    });
                }
            }

            if relocated {
                img.set_group(group, desc);
            }
            first_block += blocks_per_group;
            last_block += blocks_per_group;
        }

        debug!(
            device = %img.device_name(),
            defects = ledger.invalid_bitmaps(),
            "superblock and descriptors validated"
        );
        Ok(())
    }

    /// Printed at most once per run, before the first relocation prompt.
    fn relocate_hint(&mut self) {
        if self.relocate_hint_issued {
            return;
        }
        self.relocate_hint_issued = true;
        println!("Note: if several inode or block bitmap blocks");
        println!("require relocation, or one part of the inode table");
        println!("must be moved, you may wish to try running with the");
        println!("'-b 8193' option first.  The problem may lie only with");
        println!("the primary block group descriptors; the backup copies");
        println!("may be intact.");
    }
}
