//! End-to-end orchestrator runs against synthetic on-disk images, with
//! a recording pass collaborator standing in for the real passes.

use rfsck_check::{
    CheckConfig, CheckPasses, DefectKind, DefectLedger, Orchestrator, PassVerdict, RunMode,
    RunOutcome,
};
use rfsck_core::FsImage;
use rfsck_error::{
    EXIT_NONDESTRUCT, EXIT_OK, EXIT_REBOOT, EXIT_UNCORRECTED, FsckError, Result,
};
use rfsck_ondisk::{GroupDesc, Superblock};
use rfsck_types::{BlockNumber, EXT2_SUPER_MAGIC, GOOD_OLD_REV, STATE_VALID_FS};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const BPG: u32 = 256;
const GROUPS: u32 = 4;

/// 4 groups of 256 blocks, 1K block size, last group partial.
fn sample_superblock() -> Superblock {
    Superblock {
        inodes_count: 128,
        blocks_count: 1 + 3 * BPG + 200,
        r_blocks_count: 50,
        free_blocks_count: 900,
        free_inodes_count: 100,
        first_data_block: 1,
        log_block_size: 0,
        log_frag_size: 0,
        blocks_per_group: BPG,
        frags_per_group: BPG,
        inodes_per_group: 32,
        mtime: 0,
        wtime: 0,
        mnt_count: 5,
        max_mnt_count: 20,
        magic: EXT2_SUPER_MAGIC,
        state: STATE_VALID_FS,
        errors: 1,
        minor_rev_level: 0,
        lastcheck: 0,
        checkinterval: 0,
        creator_os: 0,
        rev_level: GOOD_OLD_REV,
        first_ino: 11,
        inode_size: 128,
    }
}

fn sample_groups(sb: &Superblock) -> Vec<GroupDesc> {
    (0..GROUPS)
        .map(|i| {
            let first = sb.first_data_block + i * BPG;
            GroupDesc {
                block_bitmap: BlockNumber(first + 2),
                inode_bitmap: BlockNumber(first + 3),
                inode_table: BlockNumber(first + 4),
                free_blocks_count: 200,
                free_inodes_count: 25,
                used_dirs_count: 1,
            }
        })
        .collect()
}

fn write_image_file(sb: &Superblock, groups: &[GroupDesc]) -> NamedTempFile {
    let mut image = vec![0_u8; sb.blocks_count as usize * 1024];
    sb.write_region(&mut image[1024..2048]).expect("superblock");
    GroupDesc::write_table(groups, &mut image[2048..2048 + groups.len() * 32])
        .expect("group descriptors");
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(&image).expect("seed image");
    file.flush().expect("flush");
    file
}

fn reparse(file: &NamedTempFile) -> (Superblock, Vec<GroupDesc>) {
    let bytes = std::fs::read(file.path()).expect("read back");
    let sb = Superblock::parse_region(&bytes[1024..2048]).expect("reparse superblock");
    let groups =
        GroupDesc::parse_table(&bytes[2048..2048 + GROUPS as usize * 32], GROUPS).expect("gd");
    (sb, groups)
}

fn config_for(file: &NamedTempFile, mode: RunMode) -> CheckConfig {
    let mut config = CheckConfig::new(file.path());
    config.mode = mode;
    config.writable = mode != RunMode::AssumeNo;
    config.settle = Duration::ZERO;
    config
}

/// Records which stages ran; pass 1 can be told to request restarts or
/// to report an uncorrectable inconsistency.
#[derive(Default)]
struct RecordingPasses {
    calls: Vec<&'static str>,
    restarts_remaining: u32,
    invalidate: bool,
    modify_in_pass2: bool,
    /// Ledger total observed at each pass-1 entry.
    ledger_totals: Vec<u32>,
    /// Ledger total handed to the rebuild stage, when it ran.
    rebuild_seen: Option<u32>,
    /// Groups the rebuild stage was told have a bad block bitmap.
    rebuild_block_groups: Vec<u32>,
    stats_outcome: Option<RunOutcome>,
}

impl CheckPasses for RecordingPasses {
    fn pass1(&mut self, img: &mut FsImage, ledger: &mut DefectLedger) -> Result<PassVerdict> {
        self.calls.push("pass1");
        self.ledger_totals.push(ledger.invalid_bitmaps());
        if self.restarts_remaining > 0 {
            self.restarts_remaining -= 1;
            return Ok(PassVerdict::Restart);
        }
        if self.invalidate {
            img.mark_valid(false);
        }
        Ok(PassVerdict::Continue)
    }

    fn pass2(&mut self, img: &mut FsImage) -> Result<()> {
        self.calls.push("pass2");
        if self.modify_in_pass2 {
            img.mark_changed();
        }
        Ok(())
    }

    fn pass3(&mut self, _img: &mut FsImage) -> Result<()> {
        self.calls.push("pass3");
        Ok(())
    }

    fn pass4(&mut self, _img: &mut FsImage) -> Result<()> {
        self.calls.push("pass4");
        Ok(())
    }

    fn pass5(&mut self, _img: &mut FsImage) -> Result<()> {
        self.calls.push("pass5");
        Ok(())
    }

    fn rebuild_bitmaps(&mut self, _img: &mut FsImage, ledger: &DefectLedger) -> Result<()> {
        self.calls.push("rebuild");
        self.rebuild_seen = Some(ledger.invalid_bitmaps());
        self.rebuild_block_groups = ledger
            .groups_with(DefectKind::BlockBitmap)
            .map(|g| g.0)
            .collect();
        Ok(())
    }

    fn report_stats(&mut self, _img: &FsImage, outcome: &RunOutcome) {
        self.stats_outcome = Some(*outcome);
    }
}

#[test]
fn clean_filesystem_exits_zero_without_passes() {
    let sb = sample_superblock();
    let file = write_image_file(&sb, &sample_groups(&sb));
    let mut passes = RecordingPasses::default();
    let code = Orchestrator::new(config_for(&file, RunMode::AssumeNo))
        .run(&mut passes)
        .expect("clean run");
    assert_eq!(code, EXIT_OK);
    assert!(passes.calls.is_empty());

    // Nothing persisted: mount count untouched.
    let (persisted, _) = reparse(&file);
    assert_eq!(persisted.mnt_count, 5);
}

#[test]
fn forced_run_executes_passes_and_resets_counters() {
    let sb = sample_superblock();
    let file = write_image_file(&sb, &sample_groups(&sb));
    let mut config = config_for(&file, RunMode::AssumeYes);
    config.force = true;
    let mut passes = RecordingPasses::default();
    let code = Orchestrator::new(config).run(&mut passes).expect("run");

    // Clean image, so the check itself changed nothing and the
    // bookkeeping writes do not count as a repair.
    assert_eq!(code, EXIT_OK);
    assert_eq!(passes.calls, vec!["pass1", "pass2", "pass3", "pass4", "pass5"]);
    let outcome = passes.stats_outcome.expect("stats reported");
    assert!(!outcome.modified);
    assert!(outcome.valid);

    let (persisted, _) = reparse(&file);
    assert_eq!(persisted.mnt_count, 0);
    assert!(persisted.lastcheck > 0);
    assert!(persisted.state_valid());
}

#[test]
fn approved_relocation_zeroes_descriptor_and_reports_modified() {
    let sb = sample_superblock();
    let mut groups = sample_groups(&sb);
    // Group 2's window is [513, 769); one block before it.
    groups[2].block_bitmap = BlockNumber(512);
    let file = write_image_file(&sb, &groups);
    let mut config = config_for(&file, RunMode::AssumeYes);
    config.force = true;
    let mut passes = RecordingPasses::default();
    let code = Orchestrator::new(config).run(&mut passes).expect("run");

    assert_eq!(code, EXIT_NONDESTRUCT);
    assert_eq!(passes.rebuild_seen, Some(1));
    assert_eq!(passes.rebuild_block_groups, vec![2]);
    assert_eq!(passes.ledger_totals, vec![1]);

    let (_, persisted_groups) = reparse(&file);
    assert_eq!(persisted_groups[2].block_bitmap, BlockNumber(0));
}

#[test]
fn declined_relocation_is_fatal() {
    let sb = sample_superblock();
    let mut groups = sample_groups(&sb);
    groups[1].inode_table = BlockNumber(2000);
    let file = write_image_file(&sb, &groups);
    let mut passes = RecordingPasses::default();
    let err = Orchestrator::new(config_for(&file, RunMode::AssumeNo))
        .run(&mut passes)
        .unwrap_err();

    assert!(matches!(
        err,
        FsckError::RepairDeclined {
            structure: "inode table",
            group: 1
        }
    ));
    assert!(passes.calls.is_empty());

    // Read-only open, nothing written.
    let (_, persisted_groups) = reparse(&file);
    assert_eq!(persisted_groups[1].inode_table, BlockNumber(2000));
}

#[test]
fn preen_halts_on_descriptor_defect() {
    let sb = sample_superblock();
    let mut groups = sample_groups(&sb);
    groups[0].block_bitmap = BlockNumber(0);
    let file = write_image_file(&sb, &groups);
    let mut passes = RecordingPasses::default();
    let err = Orchestrator::new(config_for(&file, RunMode::Preen))
        .run(&mut passes)
        .unwrap_err();
    assert!(matches!(err, FsckError::ManualIntervention { .. }));
}

#[test]
fn restart_revalidates_with_a_fresh_ledger() {
    let sb = sample_superblock();
    let mut groups = sample_groups(&sb);
    groups[2].block_bitmap = BlockNumber(512);
    let file = write_image_file(&sb, &groups);
    let mut config = config_for(&file, RunMode::AssumeYes);
    config.force = true;
    let mut passes = RecordingPasses {
        restarts_remaining: 1,
        ..RecordingPasses::default()
    };
    let code = Orchestrator::new(config).run(&mut passes).expect("run");

    // Cycle 1 zeroes the descriptor and restarts; the zero sentinel is
    // itself outside group 2's window, so cycle 2's revalidation finds
    // it again with a freshly-zeroed ledger (the counts are not carried
    // over) and the rebuild stage still gets its signal.
    assert_eq!(
        passes.calls,
        vec!["pass1", "pass1", "pass2", "pass3", "pass4", "pass5", "rebuild"]
    );
    assert_eq!(passes.ledger_totals, vec![1, 1]);
    assert_eq!(passes.rebuild_seen, Some(1));
    assert_eq!(passes.rebuild_block_groups, vec![2]);

    assert_eq!(code, EXIT_NONDESTRUCT);
    let (_, persisted_groups) = reparse(&file);
    assert_eq!(persisted_groups[2].block_bitmap, BlockNumber(0));
}

#[test]
fn pass_reported_modification_counts_as_repair() {
    let sb = sample_superblock();
    let file = write_image_file(&sb, &sample_groups(&sb));
    let mut config = config_for(&file, RunMode::AssumeYes);
    config.force = true;
    let mut passes = RecordingPasses {
        modify_in_pass2: true,
        ..RecordingPasses::default()
    };
    let code = Orchestrator::new(config).run(&mut passes).expect("run");
    assert_eq!(code, EXIT_NONDESTRUCT);
}

#[test]
fn uncorrected_inconsistency_overrides_everything() {
    let sb = sample_superblock();
    let file = write_image_file(&sb, &sample_groups(&sb));
    let mut config = config_for(&file, RunMode::AssumeYes);
    config.force = true;
    config.active_root_rw = true;
    let mut passes = RecordingPasses {
        invalidate: true,
        ..RecordingPasses::default()
    };
    let code = Orchestrator::new(config).run(&mut passes).expect("run");
    assert_eq!(code, EXIT_UNCORRECTED);

    // The valid flag is persisted cleared, so the next run cannot skip.
    let (persisted, _) = reparse(&file);
    assert!(!persisted.state_valid());
}

#[test]
fn repaired_active_root_requests_reboot() {
    let sb = sample_superblock();
    let mut groups = sample_groups(&sb);
    groups[3].inode_bitmap = BlockNumber(5000);
    let file = write_image_file(&sb, &groups);
    let mut config = config_for(&file, RunMode::AssumeYes);
    config.force = true;
    config.active_root_rw = true;
    let mut passes = RecordingPasses::default();
    let code = Orchestrator::new(config).run(&mut passes).expect("run");
    assert_eq!(code, EXIT_REBOOT);
}

#[test]
fn error_state_forces_check_despite_clean_flag() {
    let mut sb = sample_superblock();
    sb.state |= rfsck_types::STATE_ERROR_FS;
    let file = write_image_file(&sb, &sample_groups(&sb));
    let mut passes = RecordingPasses::default();
    let code = Orchestrator::new(config_for(&file, RunMode::AssumeYes))
        .run(&mut passes)
        .expect("run");

    // Check runs without the force flag, finds nothing else, and the
    // persisted state is fully clean: valid set, error cleared, so the
    // next run can take the clean skip instead of being forced forever.
    assert_eq!(passes.calls.len(), 5);
    assert_eq!(code, EXIT_OK);
    let (persisted, _) = reparse(&file);
    assert!(persisted.state_valid());
    assert!(!persisted.state_error());
}
