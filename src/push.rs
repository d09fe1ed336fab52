//! Component G: push fanout.
//!
//! Uploads a locally materialized bundle to every missed, push-capable
//! backend. Unlike the pull chain, concurrency is legal here (§5) — this
//! uses `JoinSet` the way `hurry`'s `restore_units`
//! (`src/cargo/cache/restore.rs`) fans out concurrent work over backend
//! calls, though here each task is one backend's `push` rather than one
//! file restore.

use std::path::Path;

use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::backend::BackendChain;
use crate::error::EngineError;
use crate::fingerprint::Fingerprint;

/// Outcome of a push-fanout run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Set if any backend reported a write conflict. At most one conflict
    /// is ever surfaced per fanout call — further concurrent conflicts are
    /// folded into the same signal rather than each triggering their own
    /// rePull (§4.G, §8 property 5).
    pub re_pull_needed: bool,
}

/// Push the bundle at `project_root` for `fingerprint` to every backend in
/// `missed` that is push-capable.
///
/// If `re_pull` is already `true` (this is the second pass after an earlier
/// rePull), any further conflict is fatal rather than requesting a third
/// pass — the rePull bound in §4.H/§8 property 5.
#[instrument(skip(chain, project_root), fields(missed_count = missed.len(), re_pull))]
pub async fn push_fanout(
    chain: &BackendChain,
    missed: &[String],
    fingerprint: &Fingerprint,
    project_root: &Path,
    re_pull: bool,
) -> Result<PushOutcome, EngineError> {
    let targets: Vec<_> = chain
        .iter()
        .filter(|d| missed.contains(&d.alias) && d.push)
        .cloned()
        .collect();

    let mut tasks = JoinSet::new();
    for descriptor in targets {
        let fingerprint = fingerprint.clone();
        let project_root = project_root.to_path_buf();
        tasks.spawn(async move {
            let result = descriptor.push(&fingerprint, &project_root).await;
            (descriptor.alias.clone(), descriptor.push_may_fail, result)
        });
    }

    let mut conflict: Option<EngineError> = None;
    let mut fatal: Option<EngineError> = None;

    while let Some(joined) = tasks.join_next().await {
        let (alias, push_may_fail, result) =
            joined.map_err(|e| EngineError::BackendError(format!("join push task: {e}")))?;

        match result {
            Ok(()) => {}
            Err(EngineError::BundleAlreadyExists { alias, fingerprint }) => {
                if re_pull {
                    // We just rePulled, so a conflict now is unexpected and fatal.
                    fatal.get_or_insert(EngineError::BundleAlreadyExists { alias, fingerprint });
                } else {
                    conflict.get_or_insert(EngineError::RePullNeeded(fingerprint));
                }
            }
            Err(other) if push_may_fail => {
                warn!(alias = %alias, error = %other, "push failed but backend tolerates it");
            }
            Err(other) => {
                fatal.get_or_insert(other);
            }
        }
    }

    if let Some(err) = fatal {
        return Err(err);
    }

    Ok(PushOutcome {
        re_pull_needed: conflict.is_some(),
    })
}
