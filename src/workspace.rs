//! Component C: the workspace manager.
//!
//! Provides scratch working directories and scratch cache directories so a
//! backend can write `node_modules` without colliding with the project's
//! live tree, plus a cleanup registry that runs on every exit path. Modeled
//! on `hurry`'s `fs::LockFile` typestate discipline and its use of
//! `tempfile::TempDir` in tests (`tests/it/main.rs::temporary_directory`):
//! scratch areas here are themselves backed by `tempfile::TempDir`, dropped
//! (and thus deleted) once the attempt concludes.

use std::path::{Path, PathBuf};

use tap::Pipe;
use tracing::{instrument, trace, warn};

use crate::error::EngineError;
use crate::process::TreeSyncTool;

/// A scratch working directory for one backend attempt.
pub struct ScratchDir {
    _tempdir: tempfile::TempDir,
    path: PathBuf,
}

impl ScratchDir {
    pub fn new() -> Result<Self, EngineError> {
        let tempdir = tempfile::tempdir()
            .map_err(|e| EngineError::BackendError(format!("create scratch dir: {e}")))?;
        let path = tempdir.path().to_path_buf();
        Ok(Self {
            _tempdir: tempdir,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A stack of fallible async cleanup actions, run in reverse order (most
/// recently registered first) on every exit path. This is the explicit,
/// owned replacement for the source's closed-over per-attempt cleanup state
/// called out in the design notes (§9).
#[derive(Default)]
pub struct CleanupRegistry {
    actions: Vec<Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action to run during [`CleanupRegistry::run`].
    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce() -> futures::future::BoxFuture<'static, ()> + Send + 'static,
    {
        self.actions.push(Box::new(action));
    }

    /// Run every registered action, most recently registered first.
    #[instrument(skip_all, fields(count = self.actions.len()))]
    pub async fn run(&mut self) {
        for action in self.actions.drain(..).rev() {
            action().await;
        }
    }
}

/// Manages the project's working directory and `node_modules` across one
/// install attempt.
pub struct WorkspaceManager {
    project_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn node_modules_path(&self) -> PathBuf {
        self.project_root.join("node_modules")
    }

    #[instrument(skip(self))]
    pub async fn node_modules_exists(&self) -> bool {
        tokio::fs::try_exists(self.node_modules_path())
            .await
            .unwrap_or(false)
    }

    /// Begin removing the existing `node_modules`, without waiting for it to
    /// finish. The caller is expected to `.await` the returned handle only
    /// after a successful pull, so that a failed pull does not destroy a
    /// working tree (§4.C "the clean-node-modules step is deferred").
    #[instrument(skip(self))]
    pub fn begin_clear_node_modules(&self) -> tokio::task::JoinHandle<Result<(), EngineError>> {
        let path = self.node_modules_path();
        tokio::task::spawn(async move {
            match tokio::fs::try_exists(&path).await {
                Ok(true) => tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| EngineError::BackendError(format!("remove node_modules: {e}"))),
                Ok(false) => Ok(()),
                Err(e) => Err(EngineError::BackendError(format!(
                    "check node_modules existence: {e}"
                ))),
            }
        })
    }

    /// Move (or, if a tree-sync tool is available, merge-sync) the
    /// retrieved tree from `scratch`'s `node_modules` into the project root.
    ///
    /// Prefers syncing over a wholesale move when a local sync tool is
    /// available, allowing partial reuse of existing files (§4.C).
    #[instrument(skip(self, sync))]
    pub async fn install_retrieved_tree(
        &self,
        scratch: &ScratchDir,
        sync: &dyn TreeSyncTool,
    ) -> Result<(), EngineError> {
        let src = scratch.path().join("node_modules");
        let dst = self.node_modules_path();

        if sync.is_available().await {
            trace!("tree-sync tool available, merging");
            sync.sync(&src, &dst).await
        } else {
            trace!("no tree-sync tool, moving wholesale");
            move_dir(&src, &dst).await
        }
    }
}

/// Move `src` to `dst`, falling back to copy+remove across filesystem
/// boundaries (a same-filesystem `rename` is not guaranteed when `src` is a
/// different temp mount than the project root).
#[instrument]
async fn move_dir(src: &Path, dst: &Path) -> Result<(), EngineError> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::BackendError(format!("create parent dir: {e}")))?;
    }

    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(_) => {
            warn!("cross-filesystem rename failed, falling back to copy");
            copy_dir_recursive(src, dst).await?;
            tokio::fs::remove_dir_all(src)
                .await
                .map_err(|e| EngineError::BackendError(format!("remove source dir: {e}")))
        }
    }
}

async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(dst)
        .await
        .map_err(|e| EngineError::BackendError(format!("create dir {dst:?}: {e}")))?;

    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| EngineError::BackendError(format!("read dir {src:?}: {e}")))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::BackendError(format!("read dir entry: {e}")))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| EngineError::BackendError(format!("stat entry: {e}")))?;
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            Box::pin(copy_dir_recursive(&entry.path(), &dst_path)).await?;
        } else {
            tokio::fs::copy(entry.path(), &dst_path)
                .await
                .map(drop)
                .pipe(|r| r.map_err(|e| EngineError::BackendError(format!("copy file: {e}"))))?;
        }
    }

    Ok(())
}
