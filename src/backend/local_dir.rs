//! An example local-directory backend.
//!
//! Concrete backend implementations are out of scope for this crate (§1) —
//! real git-tag, git-lfs, HTTP, and S3 backends live elsewhere. This one
//! ships anyway because every install needs at least one real backend to
//! talk to, and "just a directory on disk" is the natural zero-dependency
//! choice for local development, exactly the role `hurry`'s `LocalBackend`
//! (`src/cache/local/mod.rs`) plays for solo/offline use. Unlike that
//! backend this one stores whole `node_modules` trees rather than
//! per-unit fingerprint/file metadata, since bundles are opaque to us (§1
//! Non-goals).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::backend::{Backend, BackendOptions};
use crate::error::EngineError;
use crate::fingerprint::Fingerprint;

/// Stores each fingerprint's bundle as `{root}/{fingerprint}/node_modules`.
#[derive(Clone, Debug)]
pub struct LocalDirBackend {
    root: PathBuf,
}

impl LocalDirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bundle_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.as_str())
    }
}

#[async_trait]
impl Backend for LocalDirBackend {
    fn kind(&self) -> &'static str {
        "local-dir"
    }

    #[instrument(skip(self, _options))]
    async fn pull(
        &self,
        fingerprint: &Fingerprint,
        _options: &BackendOptions,
        cache_dir: &Path,
    ) -> Result<(), EngineError> {
        let src = self.bundle_dir(fingerprint).join("node_modules");
        if !tokio::fs::try_exists(&src)
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?
        {
            return Err(EngineError::BundleNotFound {
                alias: String::new(),
                fingerprint: fingerprint.clone(),
            });
        }

        let dst = cache_dir.join("node_modules");
        copy_tree(&src, &dst).await
    }

    #[instrument(skip(self, _options))]
    async fn push(
        &self,
        fingerprint: &Fingerprint,
        _options: &BackendOptions,
        project_root: &Path,
    ) -> Result<(), EngineError> {
        let dst_root = self.bundle_dir(fingerprint);
        let dst = dst_root.join("node_modules");

        if tokio::fs::try_exists(&dst)
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?
        {
            return Err(EngineError::BundleAlreadyExists {
                alias: String::new(),
                fingerprint: fingerprint.clone(),
            });
        }

        let src = project_root.join("node_modules");
        let staging = dst_root.join(format!(".tmp-{}", uuid_like()));
        copy_tree(&src, &staging).await?;

        match tokio::fs::rename(&staging, &dst).await {
            Ok(()) => Ok(()),
            Err(_) => {
                // Another writer won the race between our existence check
                // and our rename; clean up our staging copy and report the
                // conflict the same way a pre-existing directory would.
                let _ = tokio::fs::remove_dir_all(&staging).await;
                Err(EngineError::BundleAlreadyExists {
                    alias: String::new(),
                    fingerprint: fingerprint.clone(),
                })
            }
        }
    }

    async fn validate_options(
        &self,
        options: BackendOptions,
    ) -> Result<BackendOptions, EngineError> {
        trace!(root = ?self.root, "local-dir backend has no configurable options");
        Ok(options)
    }
}

async fn copy_tree(src: &Path, dst: &Path) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(dst)
        .await
        .map_err(|e| EngineError::BackendError(format!("create {dst:?}: {e}")))?;

    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| EngineError::BackendError(format!("read {src:?}: {e}")))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::BackendError(e.to_string()))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?;
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            Box::pin(copy_tree(&entry.path(), &dst_path)).await?;
        } else {
            tokio::fs::copy(entry.path(), &dst_path)
                .await
                .map_err(|e| EngineError::BackendError(e.to_string()))?;
        }
    }

    Ok(())
}

/// A cheap, dependency-free unique-enough suffix for staging directories.
/// Not cryptographically meaningful, only needed to avoid collisions
/// between concurrent pushes to the same fingerprint.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}-{:x}", std::process::id())
}
