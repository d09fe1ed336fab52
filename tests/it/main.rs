//! Black-box integration suite: exercises [`veendor::InstallOrchestrator`]
//! end-to-end against the in-memory doubles in `veendor::mock`, one module
//! per scenario family from the design's testable-properties table.

pub mod cancellation;
pub mod scenarios;
