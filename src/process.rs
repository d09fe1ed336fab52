//! Component M: the abstract external-tool runner.
//!
//! The engine never shells out directly (§6). Every external tool
//! invocation — VCS queries, the native package manager, the archive tool,
//! and the tree-sync tool — is abstracted behind a small trait so that the
//! core can be tested with in-memory doubles and so concrete wrappers
//! around `git`/`npm`/`tar`/`rsync` (out of scope here, same as concrete
//! backends) can be swapped without touching orchestration logic. This
//! mirrors `hurry`'s own choice to wrap all subprocess/filesystem access
//! behind its `fs` module rather than calling `tokio::process` ad hoc at
//! call sites.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

pub mod real;

/// Default timeout applied to external tool invocations when the caller
/// does not override it.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Queries against the project's version-control history (§4.E).
///
/// A timeout on any query is reported as `EngineError::BackendError`, same
/// as any other external tool failure (§5).
#[async_trait]
pub trait VcsProvider: Send + Sync {
    /// Whether `project_root` is under version control at all. The history
    /// walker is only engaged when this is true (§4.E).
    async fn is_repository(&self, project_root: &Path) -> Result<bool, EngineError>;

    /// Fetch the content of `path` (relative to the repository root) as it
    /// existed `revisions_back` commits older than HEAD, restricted to
    /// revisions that touched `path`. Returns `None` if there is no such
    /// revision (history exhausted for this path).
    async fn file_at_revision(
        &self,
        project_root: &Path,
        path: &Path,
        revisions_back: u32,
    ) -> Result<Option<Vec<u8>>, EngineError>;
}

/// The external tool that installs/uninstalls dependencies from scratch,
/// used as the last-resort fallback and to reconcile a delta (§4.F).
#[async_trait]
pub trait NativePackageManager: Send + Sync {
    /// Install exactly the given name -> version-spec pairs.
    async fn install(
        &self,
        project_root: &Path,
        specs: &BTreeMap<String, String>,
    ) -> Result<(), EngineError>;

    /// Uninstall exactly the given package names.
    async fn uninstall(&self, project_root: &Path, names: &BTreeSet<String>)
    -> Result<(), EngineError>;

    /// Perform a full install from the current manifest, ignoring any
    /// existing `node_modules` state. Used by the orchestrator's
    /// `NativeFallback` transition.
    async fn install_all(&self, project_root: &Path) -> Result<(), EngineError>;
}

/// Archive tool used by concrete backends to package/unpack bundles.
/// The engine itself never calls this directly; it exists so backend
/// implementations share one abstraction rather than shelling out to `tar`
/// independently.
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    async fn create(&self, src_dir: &Path, dst_archive: &Path) -> Result<(), EngineError>;
    async fn extract(&self, src_archive: &Path, dst_dir: &Path) -> Result<(), EngineError>;
}

/// Local dependency-tree-sync tool (rsync-class), used by the workspace
/// manager to merge a retrieved tree into the project root instead of
/// moving it wholesale, allowing partial reuse of existing files (§4.C).
#[async_trait]
pub trait TreeSyncTool: Send + Sync {
    /// Whether this tool is available on the current host. The result is
    /// safe to memoize for the lifetime of one process (§5 "Freshness
    /// caching"), but must not be persisted across restarts.
    async fn is_available(&self) -> bool;

    /// Synchronize `src` into `dst`, merging rather than replacing.
    async fn sync(&self, src: &Path, dst: &Path) -> Result<(), EngineError>;
}

/// The bundle of external-tool collaborators the engine is parameterized
/// over. Constructed once per process and threaded through the
/// orchestrator.
#[derive(Clone)]
pub struct ProcessRunner {
    pub vcs: std::sync::Arc<dyn VcsProvider>,
    pub native: std::sync::Arc<dyn NativePackageManager>,
    pub sync: std::sync::Arc<dyn TreeSyncTool>,
}
