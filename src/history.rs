//! Component E: the history walker.
//!
//! Engaged only when history fallback is configured with `depth > 0` and
//! the project is under version control (§4.E). Walks progressively older
//! revisions of the manifest (and lockfile, if tracked), recomputing the
//! fingerprint at each one, until a chain hit or depth exhaustion.

use std::path::Path;

use tracing::{debug, instrument, trace};

use crate::backend::BackendChain;
use crate::error::EngineError;
use crate::fingerprint::{Fingerprint, Salt, fingerprint};
use crate::manifest::{Lockfile, Manifest};
use crate::process::{TreeSyncTool, VcsProvider};
use crate::pull::{PullResult, pull_chain};
use crate::workspace::WorkspaceManager;

/// The well-known relative paths the history walker re-reads at each
/// revision.
pub struct ManifestPaths<'a> {
    pub manifest: &'a Path,
    pub lockfile: Option<&'a Path>,
}

/// The result of a successful history walk: the older manifest that
/// produced the hit (for the caller to reconcile against the current
/// manifest via [`crate::delta`]) plus the pull-chain result.
pub struct HistoryHit {
    pub older_manifest: Manifest,
    pub pull: PullResult,
}

/// Walk the project's VCS history looking for a near-miss bundle.
///
/// `depth` is the user-budgeted number of distinct-fingerprint revisions to
/// try; revisions whose fingerprint equals the immediately preceding one
/// (i.e. that revision didn't change the dependency set) are skipped
/// without consuming that budget (§4.E step 2c, §8 property 6).
#[instrument(skip(chain, vcs, sync, workspace, salt, current_fingerprint))]
pub async fn walk_history(
    chain: &BackendChain,
    vcs: &dyn VcsProvider,
    workspace: &WorkspaceManager,
    sync: &dyn TreeSyncTool,
    paths: ManifestPaths<'_>,
    current_fingerprint: &Fingerprint,
    salt: &Salt,
    depth: u32,
) -> Result<HistoryHit, EngineError> {
    let mut last_fingerprint = current_fingerprint.clone();
    let mut history_index: u32 = 0;
    let mut depth = depth;

    while history_index <= depth {
        let revisions_back = history_index + 1;
        trace!(revisions_back, depth, "examining revision");

        let manifest_bytes = vcs
            .file_at_revision(workspace.project_root(), paths.manifest, revisions_back)
            .await?;
        let Some(manifest_bytes) = manifest_bytes else {
            // No older revision exists at all; nothing further back to try.
            break;
        };

        let older_manifest = match std::str::from_utf8(&manifest_bytes)
            .map_err(|e| EngineError::ManifestInvalid(e.to_string()))
            .and_then(|s| Manifest::parse(s))
        {
            Ok(m) => m,
            Err(_) => {
                // Tie-break (§4.E): an unparseable older manifest is a chain
                // failure at this index, not a walk failure.
                debug!(revisions_back, "older manifest unparseable, treating as miss");
                history_index += 1;
                continue;
            }
        };

        let older_lockfile = match paths.lockfile {
            Some(lockfile_path) => {
                match vcs
                    .file_at_revision(workspace.project_root(), lockfile_path, revisions_back)
                    .await?
                {
                    Some(bytes) => {
                        let text = std::str::from_utf8(&bytes)
                            .map_err(|e| EngineError::ManifestInvalid(e.to_string()))?;
                        Some(Lockfile::parse(text)?)
                    }
                    None => None,
                }
            }
            None => None,
        };

        let new_fingerprint = fingerprint(&older_manifest, older_lockfile.as_ref(), salt)?;

        if new_fingerprint == last_fingerprint {
            // This revision didn't change the dependency set; transparently
            // extend the budget and move on without spending it.
            trace!(revisions_back, "revision unchanged, extending depth");
            depth += 1;
            history_index += 1;
            continue;
        }

        last_fingerprint = new_fingerprint.clone();

        match pull_chain(chain, &new_fingerprint, workspace, sync, None).await {
            Ok(pull) => {
                debug!(revisions_back, "history hit");
                return Ok(HistoryHit {
                    older_manifest,
                    pull,
                });
            }
            Err(EngineError::BundlesNotFound(_)) => {
                history_index += 1;
                continue;
            }
            Err(other) => return Err(other),
        }
    }

    Err(EngineError::BundlesNotFound(current_fingerprint.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendDescriptor;
    use crate::mock::{MockBackend, MockSyncTool, MockVcs};
    use std::sync::Arc;

    fn manifest_json(entries: &[(&str, &str)]) -> Vec<u8> {
        let map: std::collections::BTreeMap<_, _> =
            entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        serde_json::json!({ "dependencies": map }).to_string().into_bytes()
    }

    #[tokio::test]
    async fn s3_history_hit_two_revisions_back() {
        // revision-1 has c:1.0.0, revision-2 has c:2.1.8; backend only has
        // the revision-2 fingerprint.
        let rev1 = Manifest::parse(&String::from_utf8(manifest_json(&[("c", "1.0.0")])).unwrap())
            .unwrap();
        let rev2_bytes = manifest_json(&[("c", "2.1.8")]);
        let rev2 = Manifest::parse(&String::from_utf8(rev2_bytes.clone()).unwrap()).unwrap();
        let salt = Salt::default();
        let rev2_fp = fingerprint(&rev2, None, &salt).unwrap();

        let vcs = MockVcs::repo_with_revisions(vec![
            (1, manifest_json(&[("c", "1.0.0")])),
            (2, rev2_bytes),
        ]);
        let _ = rev1;

        let backend = Arc::new(MockBackend::with_bundle(
            rev2_fp,
            vec![("marker".into(), vec![])],
        ));
        let chain = vec![BackendDescriptor::new(
            "b0",
            backend,
            serde_json::json!({}),
            true,
            false,
        )];

        let project = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(project.path());
        let sync = MockSyncTool::unavailable();
        let current = Manifest::parse(
            &String::from_utf8(manifest_json(&[("c", "2.2.9")])).unwrap(),
        )
        .unwrap();
        let current_fp = fingerprint(&current, None, &salt).unwrap();

        let hit = walk_history(
            &chain,
            &vcs,
            &workspace,
            &sync,
            ManifestPaths {
                manifest: Path::new("package.json"),
                lockfile: None,
            },
            &current_fp,
            &salt,
            2,
        )
        .await
        .unwrap();

        assert_eq!(hit.older_manifest.runtime.get("c"), Some(&"2.1.8".to_string()));
    }

    #[tokio::test]
    async fn depth_exhaustion_fails() {
        let vcs = MockVcs::repo_with_revisions(vec![]);
        let chain: BackendChain = vec![];
        let project = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(project.path());
        let sync = MockSyncTool::unavailable();
        let salt = Salt::default();
        let current_fp = Fingerprint::from_hex("abc");

        let err = walk_history(
            &chain,
            &vcs,
            &workspace,
            &sync,
            ManifestPaths {
                manifest: Path::new("package.json"),
                lockfile: None,
            },
            &current_fp,
            &salt,
            1,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::BundlesNotFound(_)));
    }
}
