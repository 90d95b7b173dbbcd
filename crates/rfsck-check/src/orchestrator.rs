//! Run orchestration: open (with block-size fallback), validate, skip
//! or run the pass sequence, restart when a pass demands it, and
//! finalize bookkeeping plus the exit code.
//!
//! The pass bodies themselves live behind [`CheckPasses`]; the
//! orchestrator owns everything around them.

use crate::ledger::DefectLedger;
use crate::policy::{DecisionPolicy, RunMode};
use crate::skip::{SkipVerdict, check_if_skip};
use crate::superblock::SuperblockValidator;
use rfsck_core::FsImage;
use rfsck_error::{EXIT_OK, FsckError, OpenError, Result, compose_exit_code};
use rfsck_types::{BlockNumber, STATE_ERROR_FS};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Block sizes probed when an alternate superblock is given without an
/// explicit size.
pub const CANDIDATE_BLOCK_SIZES: [u32; 4] = [1024, 2048, 4096, 8192];

/// Everything one check run needs to know up front.
#[derive(Debug)]
pub struct CheckConfig {
    pub device_path: PathBuf,
    pub mode: RunMode,
    /// Open the image read-write. Callers clear this for answer-no runs.
    pub writable: bool,
    /// Check even a cleanly-unmounted filesystem.
    pub force: bool,
    /// Alternate superblock location, in blocks of `block_size` bytes.
    pub superblock: Option<u32>,
    pub block_size: Option<u32>,
    /// Known-bad block list to ingest before pass 1.
    pub bad_blocks_file: Option<PathBuf>,
    /// Whether the bad-block list replaces the existing one instead of
    /// extending it.
    pub replace_bad_blocks: bool,
    /// Scan the device surface for new bad blocks before pass 1.
    pub surface_test: bool,
    /// The image is the active root filesystem, mounted read-write.
    /// Supplied by the caller; the checker never probes mount state.
    pub active_root_rw: bool,
    /// Pause between the two close-time flushes.
    pub settle: Duration,
}

impl CheckConfig {
    #[must_use]
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            mode: RunMode::Interactive,
            writable: true,
            force: false,
            superblock: None,
            block_size: None,
            bad_blocks_file: None,
            replace_bad_blocks: false,
            surface_test: false,
            active_root_rw: false,
            settle: Duration::from_secs(1),
        }
    }
}

/// What pass 1 asks the orchestrator to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassVerdict {
    Continue,
    /// Throw away all cached state and start over from open. Only pass 1
    /// may request this; later passes build on its tables.
    Restart,
}

/// Outcome pair the exit code is composed from.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    /// Any metadata was altered this cycle.
    pub modified: bool,
    /// No uncorrected inconsistency remains.
    pub valid: bool,
}

/// The pass bodies and auxiliary stages the orchestrator drives.
///
/// Passes 1 through 5 are the check proper and must be supplied; the
/// remaining hooks default to no-ops so a collaborator only implements
/// what it supports.
pub trait CheckPasses {
    fn pass1(&mut self, img: &mut FsImage, ledger: &mut DefectLedger) -> Result<PassVerdict>;
    fn pass2(&mut self, img: &mut FsImage) -> Result<()>;
    fn pass3(&mut self, img: &mut FsImage) -> Result<()>;
    fn pass4(&mut self, img: &mut FsImage) -> Result<()>;
    fn pass5(&mut self, img: &mut FsImage) -> Result<()>;

    /// Ingest a known-bad-block list before pass 1.
    fn ingest_bad_blocks(&mut self, img: &mut FsImage, file: &Path, replace: bool) -> Result<()> {
        let _ = (img, file, replace);
        Ok(())
    }

    /// Scan the device surface for new bad blocks before pass 1.
    fn surface_test(&mut self, img: &mut FsImage) -> Result<()> {
        let _ = img;
        Ok(())
    }

    /// Rebuild the structures the ledger recorded as zeroed out.
    fn rebuild_bitmaps(&mut self, img: &mut FsImage, ledger: &DefectLedger) -> Result<()> {
        let _ = (img, ledger);
        Ok(())
    }

    /// Report end-of-run statistics to the operator.
    fn report_stats(&mut self, img: &FsImage, outcome: &RunOutcome) {
        let _ = (img, outcome);
    }
}

/// Drives one device through open → validate → passes → finalize.
pub struct Orchestrator {
    config: CheckConfig,
    policy: DecisionPolicy,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: CheckConfig) -> Self {
        let policy = DecisionPolicy::new(config.mode);
        Self { config, policy }
    }

    /// Run the full check and return the composed exit code.
    ///
    /// A restart request from pass 1 closes the image (persisting any
    /// approved repairs) and begins again with a fresh image and a fresh
    /// ledger; only the one-shot relocation hint survives the restart.
    pub fn run(&self, passes: &mut dyn CheckPasses) -> Result<i32> {
        let mut validator = SuperblockValidator::new(&self.policy);
        loop {
            let mut img = self.open_image()?;
            if self.config.superblock.is_some() && img.writable() {
                // Opened through a backup copy to repair the primary:
                // make sure the primary gets rewritten at close.
                img.mark_super_dirty();
            }

            let mut ledger = DefectLedger::new(img.groups_count());
            validator.check(&mut img, &mut ledger)?;

            let force = self.config.force
                || self.config.bad_blocks_file.is_some()
                || self.config.surface_test;
            if check_if_skip(&img, force, unix_now()) == SkipVerdict::CleanExit {
                img.discard();
                return Ok(EXIT_OK);
            }

            if let Some(file) = self.config.bad_blocks_file.clone() {
                passes.ingest_bad_blocks(&mut img, &file, self.config.replace_bad_blocks)?;
            } else if self.config.surface_test {
                passes.surface_test(&mut img)?;
            }

            // Assume consistency from here on; any pass that finds an
            // uncorrectable problem clears the flag again.
            img.mark_valid(true);

            if passes.pass1(&mut img, &mut ledger)? == PassVerdict::Restart {
                println!("Restarting from the beginning...");
                img.close(self.config.settle)?;
                continue;
            }
            passes.pass2(&mut img)?;
            passes.pass3(&mut img)?;
            passes.pass4(&mut img)?;
            passes.pass5(&mut img)?;

            return self.finalize(img, &ledger, passes);
        }
    }

    /// Open the configured device, probing block sizes when an alternate
    /// superblock was named without one.
    fn open_image(&self) -> Result<FsImage> {
        let path = &self.config.device_path;
        let writable = self.config.writable;
        let wrap = |source: OpenError| FsckError::Open {
            device: path.display().to_string(),
            source,
        };

        match (self.config.superblock, self.config.block_size) {
            (Some(sb), Some(bs)) => {
                FsImage::open_path(path, writable, Some(BlockNumber(sb)), Some(bs)).map_err(wrap)
            }
            (Some(sb), None) => {
                let mut last = None;
                for bs in CANDIDATE_BLOCK_SIZES {
                    match FsImage::open_path(path, writable, Some(BlockNumber(sb)), Some(bs)) {
                        Ok(img) => {
                            info!(block_size = bs, "alternate superblock probe succeeded");
                            return Ok(img);
                        }
                        Err(err) => last = Some(err),
                    }
                }
                Err(wrap(last.unwrap_or_else(|| {
                    OpenError::Unclassified("no candidate block size fit".into())
                })))
            }
            (None, _) => FsImage::open_path(path, writable, None, None).map_err(wrap),
        }
    }

    /// End-of-run bookkeeping: operator messages, ledger-driven bitmap
    /// rebuild, superblock check counters, write-back, exit code.
    fn finalize(
        &self,
        mut img: FsImage,
        ledger: &DefectLedger,
        passes: &mut dyn CheckPasses,
    ) -> Result<i32> {
        // Captured before the bookkeeping writes below, which always
        // dirty the superblock on a writable image.
        let outcome = RunOutcome {
            modified: img.test_changed(),
            valid: img.test_valid(),
        };

        if outcome.modified {
            if self.config.mode != RunMode::Preen {
                println!("***** FILE SYSTEM WAS MODIFIED *****");
            }
            if self.config.active_root_rw {
                println!("***** REBOOT YOUR SYSTEM *****");
            }
        }

        if ledger.has_defects() {
            passes.rebuild_bitmaps(&mut img, ledger)?;
        }

        if img.writable() {
            let now = unix_now();
            let sb = img.superblock_mut();
            sb.set_state_valid(outcome.valid);
            if outcome.valid {
                // A completed, fully-corrected run supersedes any
                // recorded error condition; leaving the bit set would
                // force a full check on every future mount.
                sb.state &= !STATE_ERROR_FS;
            }
            sb.mnt_count = 0;
            sb.lastcheck = now;
        }

        passes.report_stats(&img, &outcome);
        img.close(self.config.settle)?;
        Ok(compose_exit_code(
            outcome.modified,
            outcome.valid,
            self.config.active_root_rw,
        ))
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = CheckConfig::new("/dev/img");
        assert_eq!(config.mode, RunMode::Interactive);
        assert!(config.writable);
        assert!(!config.force);
        assert!(config.superblock.is_none());
        assert!(config.block_size.is_none());
        assert!(!config.active_root_rw);
        assert_eq!(config.settle, Duration::from_secs(1));
    }

    #[test]
    fn candidate_sizes_ascend_from_1k() {
        assert_eq!(CANDIDATE_BLOCK_SIZES[0], 1024);
        assert!(CANDIDATE_BLOCK_SIZES.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn missing_device_is_classified_open_error() {
        let config = CheckConfig::new("/nonexistent/rfsck-test-image");
        let orch = Orchestrator::new(config);
        let err = orch.open_image().unwrap_err();
        assert!(matches!(
            err,
            FsckError::Open {
                source: OpenError::NoDevice,
                ..
            }
        ));
    }
}
