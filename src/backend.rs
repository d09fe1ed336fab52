//! Component B: the pluggable backend contract.
//!
//! Modeled on `hurry`'s `CacheBackend` trait (`src/cache/backend.rs`): the
//! engine is generic over a storage abstraction and knows nothing about how
//! a bundle is serialized on the wire. Concrete backends (git-tag-based,
//! git-lfs, local directory, HTTP GET, S3) are out of scope for this crate —
//! they are real-world implementors of this trait.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fingerprint::Fingerprint;

pub mod local_dir;

/// Opaque, backend-defined configuration. The engine never inspects this;
/// it is handed to the backend unexamined for `validate_options`, `pull`,
/// and `push`.
pub type BackendOptions = serde_json::Value;

/// Storage contract every backend implementation must satisfy.
///
/// Backends are expected to be fingerprint-idempotent: pulling the same
/// fingerprint twice must yield byte-identical trees.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A short, human-readable name for log lines and error messages. Not
    /// necessarily the configured alias (that lives on the descriptor).
    fn kind(&self) -> &'static str;

    /// Materialize the bundle for `fingerprint` into `cache_dir` as a
    /// `node_modules` subdirectory.
    ///
    /// Returns `Err(EngineError::BundleNotFound(..))` (with `alias` filled
    /// in by the caller, see [`BackendDescriptor::pull`]) if this backend
    /// has no such fingerprint; any other failure surfaces as
    /// `EngineError::BackendError`.
    async fn pull(
        &self,
        fingerprint: &Fingerprint,
        options: &BackendOptions,
        cache_dir: &Path,
    ) -> Result<(), EngineError>;

    /// Upload the dependency tree currently rooted at `project_root` for
    /// `fingerprint`.
    ///
    /// Returns `Err(EngineError::BundleAlreadyExists(..))` if the target
    /// already holds this fingerprint (a race with another writer).
    async fn push(
        &self,
        fingerprint: &Fingerprint,
        options: &BackendOptions,
        project_root: &Path,
    ) -> Result<(), EngineError>;

    /// Inspect and normalize `options` at startup, populating defaults and
    /// may perform capability probes (e.g. checking an external tool is on
    /// `PATH`) when the options request one.
    ///
    /// Returns the normalized options record, or
    /// `Err(EngineError::InvalidOptions(..))`.
    async fn validate_options(
        &self,
        options: BackendOptions,
    ) -> Result<BackendOptions, EngineError>;
}

/// Bound at startup; carries the identity and capability flags for one
/// entry in the chain (§3 "Backend descriptor").
#[derive(Clone)]
pub struct BackendDescriptor {
    /// Human-readable alias, unique within a config.
    pub alias: String,
    /// Opaque options record, already validated.
    pub options: BackendOptions,
    /// Whether this backend may be pushed to at all.
    pub push: bool,
    /// Whether a push failure on this backend should be logged and
    /// tolerated rather than propagated.
    pub push_may_fail: bool,
    pub(crate) backend: Arc<dyn Backend>,
}

impl BackendDescriptor {
    pub fn new(
        alias: impl Into<String>,
        backend: Arc<dyn Backend>,
        options: BackendOptions,
        push: bool,
        push_may_fail: bool,
    ) -> Self {
        Self {
            alias: alias.into(),
            options,
            push,
            push_may_fail,
            backend,
        }
    }

    #[tracing::instrument(skip(self, cache_dir), fields(alias = %self.alias, kind = self.backend.kind()))]
    pub(crate) async fn pull(
        &self,
        fingerprint: &Fingerprint,
        cache_dir: &Path,
    ) -> Result<(), EngineError> {
        self.backend
            .pull(fingerprint, &self.options, cache_dir)
            .await
            .map_err(|e| self.tag_not_found(e, fingerprint))
    }

    #[tracing::instrument(skip(self, project_root), fields(alias = %self.alias, kind = self.backend.kind()))]
    pub(crate) async fn push(
        &self,
        fingerprint: &Fingerprint,
        project_root: &Path,
    ) -> Result<(), EngineError> {
        self.backend
            .push(fingerprint, &self.options, project_root)
            .await
            .map_err(|e| self.tag_already_exists(e, fingerprint))
    }

    /// Backends only know "not found"/"already exists" in the abstract; this
    /// fills in the alias so call sites and log lines can identify which
    /// chain entry reported it.
    fn tag_not_found(&self, err: EngineError, fingerprint: &Fingerprint) -> EngineError {
        match err {
            EngineError::BundleNotFound { .. } => EngineError::BundleNotFound {
                alias: self.alias.clone(),
                fingerprint: fingerprint.clone(),
            },
            other => other,
        }
    }

    fn tag_already_exists(&self, err: EngineError, fingerprint: &Fingerprint) -> EngineError {
        match err {
            EngineError::BundleAlreadyExists { .. } => EngineError::BundleAlreadyExists {
                alias: self.alias.clone(),
                fingerprint: fingerprint.clone(),
            },
            other => other,
        }
    }
}

/// The user-ordered list of backends. Order is significant: earlier entries
/// are preferred for pull and are candidates for push-on-miss.
pub type BackendChain = Vec<BackendDescriptor>;

/// Serializable shape of a backend descriptor as it appears in the
/// configuration object (§6). The `backend` implementation itself is looked
/// up by name by the (out of scope) config loader and is not part of this
/// serialized form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendDescriptorConfig {
    pub alias: String,
    pub backend: String,
    #[serde(default)]
    pub options: BackendOptions,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub push_may_fail: bool,
}
