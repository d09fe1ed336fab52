//! Component H: the top-level install orchestrator.
//!
//! Binds components A–G into the state machine from the design:
//! `Start -> ComputeFingerprint -> TryChain -> {Done | HistoryFallback |
//! NativeFallback | Fatal}`, with `Done -> PushPhase -> {Complete | RePull}`
//! and `RePull -> Start` (with `force` and `rePull` pinned). The rePull
//! guard is a fixed two-pass loop rather than general recursion (§9): we
//! never iterate a third time.
//!
//! One deliberate adaptation from the source design: rather than mutating
//! the process's current working directory (§3's "working tree contract"),
//! every step here takes the project root as an explicit path. Process-wide
//! cwd is process-global mutable state, which is unsound to share across
//! concurrently running installs in one address space (and our test suite
//! runs installs concurrently); passing the root explicitly gives the same
//! "never leaves the caller's view of the working directory changed"
//! guarantee without that hazard.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::backend::BackendChain;
use crate::config::Config;
use crate::delta;
use crate::error::EngineError;
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::history::{self, ManifestPaths};
use crate::manifest::{Lockfile, Manifest};
use crate::process::ProcessRunner;
use crate::pull::{PullResult, pull_chain};
use crate::push::push_fanout;
use crate::workspace::{CleanupRegistry, WorkspaceManager};

/// Everything the orchestrator needs to run one install: where the project
/// lives, where its manifest/lockfile are, and whether to override an
/// existing `node_modules`.
#[derive(Clone, Debug)]
pub struct InstallRequest {
    pub project_root: PathBuf,
    /// Path to the manifest, relative to `project_root`.
    pub manifest_path: PathBuf,
    /// Path to the lockfile, relative to `project_root`, if the front-end
    /// detected one.
    pub lockfile_path: Option<PathBuf>,
    pub force: bool,
    /// Cooperative cancellation signal, checked at each suspension point
    /// (§5 "Cancellation"). A plain `CancellationToken::new()` that nobody
    /// ever cancels behaves as "cancellation not requested" for callers that
    /// don't need it.
    pub cancellation: CancellationToken,
}

/// Where the installed bundle ultimately came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallSource {
    /// Served directly by the pull chain.
    Chain,
    /// Served by a near-miss bundle found via history walking, reconciled
    /// with a delta install.
    History,
    /// No bundle was available anywhere; a full native install was run.
    Native,
}

/// The result of a successful `install` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallOutcome {
    pub fingerprint: Fingerprint,
    pub source: InstallSource,
    /// Backends that missed during the (last) chain attempt and were
    /// therefore candidates for push.
    pub missed_backends: Vec<String>,
    /// Whether a rePull pass occurred.
    pub re_pulled: bool,
}

/// The engine: a bound backend chain, process-runner collaborators, and
/// configuration, ready to run installs against any number of projects.
pub struct InstallOrchestrator {
    chain: BackendChain,
    process: ProcessRunner,
    config: Config,
}

enum Pass {
    Complete(InstallOutcome),
    RePull(Fingerprint),
}

impl InstallOrchestrator {
    pub fn new(chain: BackendChain, process: ProcessRunner, config: Config) -> Self {
        Self {
            chain,
            process,
            config,
        }
    }

    /// Run the full fingerprint -> pull -> history-fallback -> rebuild ->
    /// push pipeline for `request`.
    #[instrument(skip(self, request), fields(project_root = ?request.project_root))]
    pub async fn install(&self, request: InstallRequest) -> Result<InstallOutcome, EngineError> {
        if self.chain.is_empty() {
            return Err(EngineError::InvalidOptions {
                alias: "<config>".to_string(),
                reason: "backend chain must be non-empty".to_string(),
            });
        }

        let workspace = WorkspaceManager::new(request.project_root.clone());
        let mut force = request.force;
        let mut re_pull = false;
        let mut pinned: Option<Fingerprint> = None;

        // Bounded two-pass loop: pass 0 is the normal attempt, pass 1 (if
        // reached) is the single allowed rePull. A third pass never occurs.
        for pass in 0..2 {
            match self
                .run_pass(&request, &workspace, force, re_pull, pinned.clone())
                .await?
            {
                Pass::Complete(outcome) => return Ok(outcome),
                Pass::RePull(fp) => {
                    if pass == 1 {
                        unreachable!("run_pass must not request a rePull on the second pass");
                    }
                    info!(fingerprint = %fp, "push conflict, scheduling single rePull");
                    force = true;
                    re_pull = true;
                    pinned = Some(fp);
                }
            }
        }

        unreachable!("loop either returns or is bounded to 2 passes by construction")
    }

    #[instrument(skip(self, request, workspace, pinned))]
    async fn run_pass(
        &self,
        request: &InstallRequest,
        workspace: &WorkspaceManager,
        force: bool,
        re_pull: bool,
        pinned: Option<Fingerprint>,
    ) -> Result<Pass, EngineError> {
        self.check_cancelled(&request.cancellation)?;

        // Start.
        if workspace.node_modules_exists().await && !force {
            return Err(EngineError::NodeModulesAlreadyExist);
        }
        let pending_clear = if workspace.node_modules_exists().await {
            Some(workspace.begin_clear_node_modules())
        } else {
            None
        };

        if request.cancellation.is_cancelled() {
            // We may own an in-flight node_modules removal; abort it through
            // the cleanup registry rather than leaving it to race a future
            // attempt (§5 "in-flight subprocess operations must be signaled
            // to terminate").
            let mut cleanup = CleanupRegistry::new();
            if let Some(handle) = pending_clear {
                cleanup.defer(move || {
                    handle.abort();
                    Box::pin(async {})
                });
            }
            cleanup.run().await;
            return Err(EngineError::Cancelled);
        }

        // ComputeFingerprint. On a rePull pass we reuse the pinned
        // fingerprint unchanged and skip freshness checks (§4.H "second
        // pass"), but we still need the current manifest on hand in case a
        // history/native fallback is needed on this pass too.
        let manifest_path = request.project_root.join(&request.manifest_path);
        let manifest = Manifest::read(&manifest_path).await?;
        let lockfile = match &request.lockfile_path {
            Some(p) => Lockfile::read_optional(&request.project_root.join(p)).await?,
            None => None,
        };

        let fp = match (re_pull, pinned) {
            (true, Some(pinned)) => pinned,
            _ => fingerprint(&manifest, lockfile.as_ref(), &self.config.salt())?,
        };

        // TryChain.
        let sync = self.process.sync.as_ref();
        match pull_chain(&self.chain, &fp, workspace, sync, pending_clear).await {
            Ok(pull) => {
                self.check_cancelled(&request.cancellation)?;
                self.push_phase(&fp, &pull.missed, workspace.project_root(), re_pull)
                    .await
                    .map(|outcome| self.finish(fp, InstallSource::Chain, pull, outcome, re_pull))
            }
            Err(EngineError::BundlesNotFound(_)) => {
                self.fallback(request, workspace, &manifest, &fp, re_pull)
                    .await
            }
            Err(other) => Err(other),
        }
    }

    #[instrument(skip(self, request, workspace, current_manifest, fp))]
    async fn fallback(
        &self,
        request: &InstallRequest,
        workspace: &WorkspaceManager,
        current_manifest: &Manifest,
        fp: &Fingerprint,
        re_pull: bool,
    ) -> Result<Pass, EngineError> {
        self.check_cancelled(&request.cancellation)?;

        if self.config.history_enabled() && self.process.vcs.is_repository(workspace.project_root()).await? {
            let depth = self.config.use_git_history.as_ref().map(|c| c.depth).unwrap_or(0);
            let paths = ManifestPaths {
                manifest: &request.manifest_path,
                lockfile: request.lockfile_path.as_deref(),
            };
            match history::walk_history(
                &self.chain,
                self.process.vcs.as_ref(),
                workspace,
                self.process.sync.as_ref(),
                paths,
                fp,
                &self.config.salt(),
                depth,
            )
            .await
            {
                Ok(hit) => {
                    delta::reconcile(
                        self.process.native.as_ref(),
                        workspace.project_root(),
                        &hit.older_manifest,
                        current_manifest,
                    )
                    .await?;
                    return self
                        .push_phase(fp, &hit.pull.missed, workspace.project_root(), re_pull)
                        .await
                        .map(|outcome| {
                            self.finish(fp.clone(), InstallSource::History, hit.pull, outcome, re_pull)
                        });
                }
                Err(e) if !e.is_fatal() => {
                    debug!("history walk exhausted, considering native fallback");
                }
                Err(e) => return Err(e),
            }
        }

        if self.config.fallback_to_npm {
            self.process.native.install_all(workspace.project_root()).await?;
            let outcome = self
                .push_phase(fp, &all_aliases(&self.chain), workspace.project_root(), re_pull)
                .await?;
            if outcome.re_pull_needed && !re_pull {
                return Ok(Pass::RePull(fp.clone()));
            }
            return Ok(Pass::Complete(InstallOutcome {
                fingerprint: fp.clone(),
                source: InstallSource::Native,
                missed_backends: all_aliases(&self.chain),
                re_pulled: re_pull,
            }));
        }

        Err(EngineError::BundlesNotFound(fp.clone()))
    }

    async fn push_phase(
        &self,
        fp: &Fingerprint,
        missed: &[String],
        project_root: &Path,
        re_pull: bool,
    ) -> Result<crate::push::PushOutcome, EngineError> {
        push_fanout(&self.chain, missed, fp, project_root, re_pull).await
    }

    /// Whether the caller has requested cancellation; a non-cleanup-aware
    /// check used at suspension points that don't currently own a scratch
    /// resource.
    fn check_cancelled(&self, token: &CancellationToken) -> Result<(), EngineError> {
        if token.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn finish(
        &self,
        fp: Fingerprint,
        source: InstallSource,
        pull: PullResult,
        outcome: crate::push::PushOutcome,
        re_pull: bool,
    ) -> Pass {
        if outcome.re_pull_needed {
            return Pass::RePull(fp);
        }
        Pass::Complete(InstallOutcome {
            fingerprint: fp,
            source,
            missed_backends: pull.missed,
            re_pulled: re_pull,
        })
    }
}

fn all_aliases(chain: &BackendChain) -> Vec<String> {
    chain.iter().map(|d| d.alias.clone()).collect()
}
