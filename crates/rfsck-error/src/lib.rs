#![forbid(unsafe_code)]
//! Error types and exit-status taxonomy for rfsck.
//!
//! # Error model
//!
//! rfsck distinguishes exactly two tiers of failure:
//!
//! | Tier | Representation | Behavior |
//! |------|----------------|----------|
//! | fatal | any `FsckError` value | propagated to `main`, which prints the diagnostic (plus a remediation hint where one exists) and exits |
//! | recoverable-via-policy | `DecisionPolicy::ask` outcome | either applied and recorded in the defect ledger, or converted into `FsckError::RepairDeclined` |
//!
//! Library code never calls `process::exit`; every component returns the
//! error value so it stays testable in isolation. The CLI boundary owns
//! actual termination.
//!
//! # Exit classification
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | clean, no errors |
//! | 1 | errors corrected non-destructively |
//! | 2 | errors corrected, reboot required (active root, read-write) |
//! | 4 | errors left uncorrected |
//! | 8 | operational error (open failure, I/O, declined repair) |
//! | 16 | usage error |
//!
//! Higher codes take precedence: an invalid filesystem reports 4 even
//! when it was also modified, and 2 only upgrades 1 when the filesystem
//! ends up valid.

use thiserror::Error;

pub const EXIT_OK: i32 = 0;
pub const EXIT_NONDESTRUCT: i32 = 1;
pub const EXIT_REBOOT: i32 = 2;
pub const EXIT_UNCORRECTED: i32 = 4;
pub const EXIT_ERROR: i32 = 8;
pub const EXIT_USAGE: i32 = 16;

/// Why an image could not be opened.
///
/// Classification drives the remediation hint printed at the CLI
/// boundary, so every open failure must land in exactly one variant.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The image's format revision is newer than this checker understands.
    #[error("filesystem revision level too high")]
    RevisionTooHigh,

    /// The superblock region could not be read in full (truncated image,
    /// zero-length partition).
    #[error("short read while reading superblock")]
    ShortRead,

    /// The operator lacks read (or read-write) access to the image.
    #[error("permission denied opening filesystem")]
    Permission,

    /// The path names a non-existent or special device.
    #[error("no such device")]
    NoDevice,

    /// Anything else: bad magic, impossible geometry, unexpected I/O
    /// failure. Likely primary-superblock damage, so the alternate-
    /// superblock hint applies.
    #[error("{0}")]
    Unclassified(String),
}

impl OpenError {
    /// Classify an I/O error from the device-open path.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) if code == libc::EPERM || code == libc::EACCES => Self::Permission,
            Some(code) if code == libc::ENXIO || code == libc::ENODEV => Self::NoDevice,
            Some(code) if code == libc::ENOENT => Self::NoDevice,
            _ => Self::Unclassified(err.to_string()),
        }
    }
}

/// Unified error type for the whole checker.
#[derive(Debug, Error)]
pub enum FsckError {
    /// Operating system I/O error outside the open path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image open failure, already classified.
    #[error("while trying to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: OpenError,
    },

    /// Global-scope corruption in the superblock. Unrepairable by
    /// definition; carries the field-level diagnostic.
    #[error("corruption found in superblock ({detail})")]
    Corrupt { detail: String },

    /// The decision policy declined a relocation, leaving a structural
    /// defect unresolved.
    #[error("{structure} not in group {group}, relocation declined")]
    RepairDeclined { structure: &'static str, group: u32 },

    /// Preen mode hit a defect too severe to auto-approve.
    #[error("{device}: UNEXPECTED INCONSISTENCY; run fsck manually")]
    ManualIntervention { device: String },

    /// The image uses a format feature this checker does not handle.
    #[error("{0}")]
    Unsupported(String),

    /// The operator chose to abort when offered the chance.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Interactive mode without a connected terminal.
    #[error("need terminal for interactive repairs")]
    NeedTerminal,

    /// Resource exhaustion (allocation and similar).
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// Bad command line.
    #[error("usage error: {0}")]
    Usage(String),
}

impl FsckError {
    /// Exit status for a fatal error, reported before any filesystem
    /// state is touched. Exhaustive so new variants must pick a code.
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            Self::Io(_)
            | Self::Open { .. }
            | Self::Corrupt { .. }
            | Self::RepairDeclined { .. }
            | Self::ManualIntervention { .. }
            | Self::Unsupported(_)
            | Self::Aborted(_)
            | Self::NeedTerminal
            | Self::Resource(_) => EXIT_ERROR,
        }
    }

    /// Whether the alternate-superblock remediation hint applies to
    /// this failure.
    #[must_use]
    pub fn wants_superblock_hint(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. }
                | Self::Open {
                    source: OpenError::Unclassified(_),
                    ..
                }
        )
    }
}

/// Result alias using `FsckError`.
pub type Result<T> = std::result::Result<T, FsckError>;

/// Compose the final exit code from the run outcome pair.
///
/// `modified`: any metadata was altered. `valid`: no uncorrected
/// inconsistency remains. `active_root_rw`: the checked image is the
/// currently-active root filesystem mounted read-write (external
/// signal; the checker never probes mount state itself).
#[must_use]
pub fn compose_exit_code(modified: bool, valid: bool, active_root_rw: bool) -> i32 {
    if !valid {
        EXIT_UNCORRECTED
    } else if modified && active_root_rw {
        EXIT_REBOOT
    } else if modified {
        EXIT_NONDESTRUCT
    } else {
        EXIT_OK
    }
}
