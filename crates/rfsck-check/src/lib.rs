#![forbid(unsafe_code)]
//! Control core of the consistency checker: decision policy, defect
//! ledger, superblock/group-descriptor validation, skip heuristic, and
//! the restartable run orchestrator.

pub mod ledger;
pub mod orchestrator;
pub mod policy;
pub mod skip;
pub mod superblock;

pub use ledger::{DefectKind, DefectLedger};
pub use orchestrator::{
    CANDIDATE_BLOCK_SIZES, CheckConfig, CheckPasses, Orchestrator, PassVerdict, RunOutcome,
};
pub use policy::{DecisionPolicy, RunMode};
pub use skip::{SkipVerdict, check_if_skip};
pub use superblock::{Bound, SuperblockValidator, check_super_value};
