//! The closed set of error kinds the engine can surface.
//!
//! Every fallible operation in this crate returns `Result<T, EngineError>`.
//! The CLI boundary (`src/bin/veendor`) wraps these in `color_eyre::Result`
//! for pretty reporting; internal code matches on this enum directly instead
//! of inspecting opaque error instances.

use std::path::PathBuf;

use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Canonical error type for the install-resolution engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The manifest file does not exist at the expected path.
    #[error("manifest not found at {0}")]
    ManifestNotFound(PathBuf),

    /// The manifest exists but could not be parsed, or is missing a
    /// required dependency section.
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// `node_modules` already exists and `force` was not set.
    #[error("node_modules already exists; pass force to overwrite")]
    NodeModulesAlreadyExist,

    /// A single backend has no bundle for the requested fingerprint.
    #[error("backend {alias} has no bundle for fingerprint {fingerprint}")]
    BundleNotFound {
        alias: String,
        fingerprint: Fingerprint,
    },

    /// Every backend in the chain missed.
    #[error("no backend in the chain has a bundle for fingerprint {0}")]
    BundlesNotFound(Fingerprint),

    /// A backend already holds a bundle for this fingerprint (write race).
    #[error("backend {alias} already has a bundle for fingerprint {fingerprint}")]
    BundleAlreadyExists {
        alias: String,
        fingerprint: Fingerprint,
    },

    /// Push fanout detected a conflict and the orchestrator should rePull.
    #[error("push conflict on {0}, a rePull is required")]
    RePullNeeded(Fingerprint),

    /// A backend's options record failed validation at startup.
    #[error("invalid options for backend {alias}: {reason}")]
    InvalidOptions { alias: String, reason: String },

    /// An opaque backend-, process-, or I/O-level failure.
    #[error("backend error: {0}")]
    BackendError(String),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Internal precondition violation: the delta installer was invoked with
    /// two manifests that do not differ. The history walker must only ever
    /// hand the delta installer manifests that changed the dependency set;
    /// reaching this is a bug in the caller, not a recoverable condition.
    #[error("reconcile called with no difference between manifests")]
    EmptyDelta,
}

impl EngineError {
    /// Whether this error should be treated as fatal for the top-level
    /// install, i.e. it does not participate in any of the local-recovery
    /// transitions enumerated in the orchestrator state machine.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::BundleNotFound { .. }
                | EngineError::BundlesNotFound(_)
                | EngineError::BundleAlreadyExists { .. }
                | EngineError::RePullNeeded(_)
        )
    }
}
