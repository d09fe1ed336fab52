//! Component D: the ordered pull chain.
//!
//! Iterates the chain in order — ordering is semantic (§5), so this is a
//! sequential loop rather than a fan-out, unlike the concurrent push fanout
//! in [`crate::push`].

use tracing::{debug, instrument};

use crate::backend::BackendChain;
use crate::error::EngineError;
use crate::fingerprint::Fingerprint;
use crate::process::TreeSyncTool;
use crate::workspace::{ScratchDir, WorkspaceManager};

/// The result of a successful pull-chain run: which backends were missed
/// (strictly before the one that served the pull).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PullResult {
    pub missed: Vec<String>,
}

/// Run the pull chain against `fingerprint`.
///
/// On success, the retrieved tree has already been installed into the
/// project root via [`WorkspaceManager::install_retrieved_tree`]. On
/// exhaustion, returns `Err(EngineError::BundlesNotFound(fingerprint))`; any
/// non-miss failure from a backend aborts the chain immediately and
/// propagates (§4.D "on any other failure, abort the chain and surface the
/// error").
#[instrument(skip(chain, workspace, sync, pending_clear), fields(chain_len = chain.len()))]
pub async fn pull_chain(
    chain: &BackendChain,
    fingerprint: &Fingerprint,
    workspace: &WorkspaceManager,
    sync: &dyn TreeSyncTool,
    pending_clear: Option<tokio::task::JoinHandle<Result<(), EngineError>>>,
) -> Result<PullResult, EngineError> {
    let mut missed = Vec::new();
    let mut pending_clear = pending_clear;

    for descriptor in chain {
        let scratch = ScratchDir::new()?;
        let cache_dir = scratch.path();

        match descriptor.pull(fingerprint, cache_dir).await {
            Ok(()) => {
                debug!(alias = %descriptor.alias, "pull hit");

                // Await any pending removal before installing the retrieved
                // tree, so we never write into a half-deleted node_modules.
                if let Some(handle) = pending_clear.take() {
                    handle
                        .await
                        .map_err(|e| EngineError::BackendError(format!("join cleanup task: {e}")))??;
                }

                workspace.install_retrieved_tree(&scratch, sync).await?;

                return Ok(PullResult { missed });
            }
            Err(EngineError::BundleNotFound { alias, .. }) => {
                debug!(alias = %alias, "pull miss");
                missed.push(alias);
                continue;
            }
            Err(other) => {
                // Abort rather than await: the pull failed outright (not a
                // miss), so we're about to propagate an error and must not
                // let a force-mode removal keep running/finish destroying
                // node_modules behind our back (§4.C "a failed pull does
                // not destroy a working tree").
                if let Some(handle) = pending_clear.take() {
                    handle.abort();
                }
                return Err(other);
            }
        }
    }

    // Chain exhausted: still need to resolve any pending clear before
    // returning control, otherwise the caller might race the clear with its
    // own subsequent writes.
    if let Some(handle) = pending_clear.take() {
        handle
            .await
            .map_err(|e| EngineError::BackendError(format!("join cleanup task: {e}")))??;
    }

    Err(EngineError::BundlesNotFound(fingerprint.clone()))
}
