//! Engine services

pub mod capture;
pub mod compliance;
pub mod diff;
pub mod sweeper;

pub use capture::CaptureService;
pub use compliance::{AnonymizeOutcome, ComplianceService, ExportDocument};
pub use diff::{anonymize_snapshot, apply_diff, compute_diff};
pub use sweeper::{
    next_occurrence, start_retention_scheduler, RetentionSchedulerState, RetentionSweeper,
    SweepOutcome,
};
