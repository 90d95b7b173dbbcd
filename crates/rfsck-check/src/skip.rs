//! Clean-skip heuristic: decide, after validation, whether the full
//! pass sequence can be skipped because the filesystem was cleanly
//! unmounted and is not overdue for a check.

use rfsck_core::FsImage;

/// Outcome of the skip decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipVerdict {
    /// Run the full pass sequence.
    RunCheck,
    /// Filesystem is clean; exit successfully without checking.
    CleanExit,
}

/// Decide whether the pass sequence may be skipped.
///
/// `force` covers both the explicit force flag and any flag that exists
/// to do work on the filesystem regardless of cleanliness (bad-block
/// ingestion, surface test); those callers always run. Otherwise a
/// recorded error state, an exhausted mount budget, or an expired check
/// interval forces the check with a printed reason, and only a
/// valid-marked filesystem earns the clean exit. `now` is seconds since
/// the epoch, passed in so the interval arithmetic is testable.
#[must_use]
pub fn check_if_skip(img: &FsImage, force: bool, now: u32) -> SkipVerdict {
    if force {
        return SkipVerdict::RunCheck;
    }

    let sb = img.superblock();
    let reason = if sb.state_error() {
        Some("contains a file system with errors")
    } else if sb.mnt_count >= sb.max_mnt_count {
        Some("has reached maximal mount count")
    } else if sb.checkinterval > 0 && now >= sb.lastcheck.saturating_add(sb.checkinterval) {
        Some("has gone too long without being checked")
    } else {
        None
    };

    if let Some(reason) = reason {
        println!("{} {reason}, check forced.", img.device_name());
        return SkipVerdict::RunCheck;
    }

    if sb.state_valid() {
        // Free counts are pass-5 territory and not validated here, so
        // keep the arithmetic safe against nonsense values.
        println!(
            "{}: clean, {}/{} files, {}/{} blocks",
            img.device_name(),
            sb.inodes_count.saturating_sub(sb.free_inodes_count),
            sb.inodes_count,
            sb.blocks_count.saturating_sub(sb.free_blocks_count),
            sb.blocks_count
        );
        return SkipVerdict::CleanExit;
    }

    // Never marked valid (interrupted check, fresh corruption): run.
    SkipVerdict::RunCheck
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfsck_block::MemByteDevice;
    use rfsck_ondisk::{GroupDesc, Superblock};
    use rfsck_types::{
        BlockNumber, EXT2_SUPER_MAGIC, GOOD_OLD_REV, STATE_ERROR_FS, STATE_VALID_FS,
    };

    fn sample_superblock() -> Superblock {
        Superblock {
            inodes_count: 32,
            blocks_count: 512,
            r_blocks_count: 25,
            free_blocks_count: 400,
            free_inodes_count: 20,
            first_data_block: 1,
            log_block_size: 0,
            log_frag_size: 0,
            blocks_per_group: 512,
            frags_per_group: 512,
            inodes_per_group: 32,
            mtime: 0,
            wtime: 0,
            mnt_count: 1,
            max_mnt_count: 20,
            magic: EXT2_SUPER_MAGIC,
            state: STATE_VALID_FS,
            errors: 1,
            minor_rev_level: 0,
            lastcheck: 10_000,
            checkinterval: 0,
            creator_os: 0,
            rev_level: GOOD_OLD_REV,
            first_ino: 11,
            inode_size: 128,
        }
    }

    fn open_with(sb: &Superblock) -> FsImage {
        let mut image = vec![0_u8; sb.blocks_count as usize * 1024];
        sb.write_region(&mut image[1024..2048]).expect("superblock");
        let group = GroupDesc {
            block_bitmap: BlockNumber(3),
            inode_bitmap: BlockNumber(4),
            inode_table: BlockNumber(5),
            free_blocks_count: 400,
            free_inodes_count: 20,
            used_dirs_count: 2,
        };
        GroupDesc::write_table(&[group], &mut image[2048..2080]).expect("gd");
        let device = MemByteDevice::new(image, false);
        FsImage::open(Box::new(device), "/dev/img", None, None).expect("open")
    }

    #[test]
    fn clean_filesystem_skips() {
        let img = open_with(&sample_superblock());
        assert_eq!(check_if_skip(&img, false, 20_000), SkipVerdict::CleanExit);
    }

    #[test]
    fn force_overrides_cleanliness() {
        let img = open_with(&sample_superblock());
        assert_eq!(check_if_skip(&img, true, 20_000), SkipVerdict::RunCheck);
    }

    #[test]
    fn error_state_forces_check() {
        let mut sb = sample_superblock();
        sb.state |= STATE_ERROR_FS;
        let img = open_with(&sb);
        assert_eq!(check_if_skip(&img, false, 20_000), SkipVerdict::RunCheck);
    }

    #[test]
    fn mount_count_budget_forces_check() {
        let mut sb = sample_superblock();
        sb.mnt_count = 20;
        sb.max_mnt_count = 20;
        let img = open_with(&sb);
        assert_eq!(check_if_skip(&img, false, 20_000), SkipVerdict::RunCheck);
    }

    #[test]
    fn zero_max_mount_count_forces_every_check() {
        // An exhausted (or never-granted) mount budget always forces;
        // the compare is unconditional, so max_mnt_count = 0 means a
        // full check on every run.
        let mut sb = sample_superblock();
        sb.mnt_count = 0;
        sb.max_mnt_count = 0;
        let img = open_with(&sb);
        assert_eq!(check_if_skip(&img, false, 20_000), SkipVerdict::RunCheck);
    }

    #[test]
    fn check_interval_expiry_forces_check() {
        let mut sb = sample_superblock();
        sb.lastcheck = 10_000;
        sb.checkinterval = 5_000;
        let img = open_with(&sb);
        // Exactly at the deadline counts as overdue.
        assert_eq!(check_if_skip(&img, false, 15_000), SkipVerdict::RunCheck);

        let img = open_with(&sb);
        assert_eq!(check_if_skip(&img, false, 14_999), SkipVerdict::CleanExit);
    }

    #[test]
    fn never_marked_valid_runs_silently() {
        let mut sb = sample_superblock();
        sb.state = 0;
        let img = open_with(&sb);
        assert_eq!(check_if_skip(&img, false, 20_000), SkipVerdict::RunCheck);
    }
}
