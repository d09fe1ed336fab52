//! `veendor install` — run the full fingerprint -> pull -> history-fallback
//! -> rebuild -> push pipeline against the current working directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tracing::instrument;

use veendor::backend::local_dir::LocalDirBackend;
use veendor::backend::{Backend, BackendChain, BackendDescriptor, BackendDescriptorConfig};
use veendor::config::Config;
use veendor::orchestrator::{InstallOrchestrator, InstallRequest};
use veendor::process::real::{GitVcs, NpmPackageManager, RsyncTool};
use veendor::process::ProcessRunner;

const MANIFEST_NAME: &str = "package.json";
const LOCKFILE_NAME: &str = "package-lock.json";

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Path to the `veendor` configuration file (TOML).
    #[arg(long, default_value = "veendor.toml")]
    config: PathBuf,

    /// Overwrite an existing `node_modules` instead of failing.
    #[arg(long)]
    force: bool,
}

#[instrument]
pub async fn exec(options: Options) -> Result<()> {
    let project_root = std::env::current_dir().context("get current directory")?;

    let config_path = project_root.join(&options.config);
    let config_text = tokio::fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("read config at {config_path:?}"))?;
    let config = Config::parse_toml(&config_text).context("parse config")?;

    let chain = resolve_chain(&config.backends).await?;

    let process = ProcessRunner {
        vcs: Arc::new(GitVcs::new()),
        native: Arc::new(NpmPackageManager::new()),
        sync: Arc::new(RsyncTool::new()),
    };

    let orchestrator = InstallOrchestrator::new(chain, process, config);

    let lockfile_path = project_root.join(LOCKFILE_NAME);
    let lockfile_path = if tokio::fs::try_exists(&lockfile_path)
        .await
        .unwrap_or(false)
    {
        Some(PathBuf::from(LOCKFILE_NAME))
    } else {
        None
    };

    let outcome = orchestrator
        .install(InstallRequest {
            project_root,
            manifest_path: PathBuf::from(MANIFEST_NAME),
            lockfile_path,
            force: options.force,
            cancellation: Default::default(),
        })
        .await
        .context("install")?;

    println!(
        "installed {} via {:?} (missed: {:?}, re_pulled: {})",
        outcome.fingerprint, outcome.source, outcome.missed_backends, outcome.re_pulled
    );
    Ok(())
}

/// Resolve each configured backend descriptor to a real [`Backend`]
/// implementation. Only `local-dir` is shipped; other kinds (git-tag,
/// git-lfs, http, s3) are real-world collaborators out of scope for this
/// crate (§1).
async fn resolve_chain(descriptors: &[BackendDescriptorConfig]) -> Result<BackendChain> {
    let mut chain = BackendChain::new();
    for descriptor in descriptors {
        let backend: Arc<dyn Backend> = match descriptor.backend.as_str() {
            "local-dir" => {
                let root = descriptor
                    .options
                    .get("root")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| eyre!("backend {:?}: local-dir requires `root`", descriptor.alias))?;
                Arc::new(LocalDirBackend::new(PathBuf::from(root)))
            }
            other => {
                return Err(eyre!(
                    "backend {:?}: unknown backend kind {:?} (git-tag/git-lfs/http/s3 backends are not shipped in this crate)",
                    descriptor.alias,
                    other
                ));
            }
        };

        let options = backend
            .validate_options(descriptor.options.clone())
            .await
            .map_err(|e| eyre!("validate options for {:?}: {e}", descriptor.alias))?;

        chain.push(BackendDescriptor::new(
            descriptor.alias.clone(),
            backend,
            options,
            descriptor.push,
            descriptor.push_may_fail,
        ));
    }
    Ok(chain)
}
