//! Concrete, subprocess-backed implementations of the `ProcessRunner` family.
//!
//! Thin wrappers around `git`, the native package manager, and an
//! `rsync`-class sync tool are out of scope for the core (§1) — the engine
//! only ever depends on the traits in [`crate::process`]. These exist for
//! the same reason [`crate::backend::local_dir`] ships a real backend: the
//! `veendor` binary needs *something* to hand the orchestrator, and shelling
//! out the obvious way is the natural zero-dependency choice, mirroring how
//! `hurry`'s own `cargo.rs`/`cross.rs` wrap `tokio::process::Command` rather
//! than reach for a dedicated subprocess-wrapper crate.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::error::EngineError;
use crate::process::{ArchiveTool, NativePackageManager, TreeSyncTool, VcsProvider, DEFAULT_TOOL_TIMEOUT};

/// Run `program` with `args` in `cwd`, capturing output, bounded by
/// `timeout`. A timeout or a non-zero exit both surface as
/// `EngineError::BackendError` (§5 "A timeout is reported as a
/// `BackendError` and participates in the chain logic").
async fn run(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<std::process::Output, EngineError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    cmd.current_dir(cwd);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let child = cmd
        .spawn()
        .map_err(|e| EngineError::BackendError(format!("spawn {program}: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(EngineError::BackendError(format!("run {program}: {e}"))),
        Err(_) => Err(EngineError::BackendError(format!(
            "{program} timed out after {timeout:?}"
        ))),
    }
}

fn ensure_success(program: &str, output: std::process::Output) -> Result<std::process::Output, EngineError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(EngineError::BackendError(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

/// `git`-backed [`VcsProvider`].
#[derive(Clone, Debug, Default)]
pub struct GitVcs {
    timeout: Duration,
}

impl GitVcs {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl VcsProvider for GitVcs {
    #[instrument(skip(self))]
    async fn is_repository(&self, project_root: &Path) -> Result<bool, EngineError> {
        match run(
            "git",
            &["rev-parse", "--is-inside-work-tree"],
            project_root,
            self.timeout,
        )
        .await
        {
            Ok(output) => Ok(output.status.success()),
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn file_at_revision(
        &self,
        project_root: &Path,
        path: &Path,
        revisions_back: u32,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let path_str = path.to_string_lossy().to_string();
        let skip = (revisions_back - 1).to_string();

        let log = run(
            "git",
            &[
                "log",
                "--format=%H",
                "--skip",
                &skip,
                "-n",
                "1",
                "--",
                &path_str,
            ],
            project_root,
            self.timeout,
        )
        .await?;
        if !log.status.success() {
            return Ok(None);
        }
        let revision = String::from_utf8_lossy(&log.stdout).trim().to_string();
        if revision.is_empty() {
            trace!(revisions_back, "no revision touched this path that far back");
            return Ok(None);
        }

        let spec = format!("{revision}:{path_str}");
        match run("git", &["show", &spec], project_root, self.timeout).await {
            Ok(output) if output.status.success() => Ok(Some(output.stdout)),
            _ => Ok(None),
        }
    }
}

/// `npm`-backed [`NativePackageManager`].
#[derive(Clone, Debug, Default)]
pub struct NpmPackageManager {
    timeout: Duration,
}

impl NpmPackageManager {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

#[async_trait]
impl NativePackageManager for NpmPackageManager {
    #[instrument(skip(self))]
    async fn install(
        &self,
        project_root: &Path,
        specs: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let args: Vec<String> = specs
            .iter()
            .map(|(name, version)| format!("{name}@{version}"))
            .collect();
        let mut full_args = vec!["install"];
        full_args.extend(args.iter().map(String::as_str));
        let output = run("npm", &full_args, project_root, self.timeout).await?;
        ensure_success("npm install", output).map(drop)
    }

    #[instrument(skip(self))]
    async fn uninstall(
        &self,
        project_root: &Path,
        names: &BTreeSet<String>,
    ) -> Result<(), EngineError> {
        let mut full_args = vec!["uninstall"];
        full_args.extend(names.iter().map(String::as_str));
        let output = run("npm", &full_args, project_root, self.timeout).await?;
        ensure_success("npm uninstall", output).map(drop)
    }

    #[instrument(skip(self))]
    async fn install_all(&self, project_root: &Path) -> Result<(), EngineError> {
        let output = run("npm", &["install"], project_root, self.timeout).await?;
        ensure_success("npm install", output).map(drop)
    }
}

/// `rsync`-backed [`TreeSyncTool`].
///
/// Availability is probed once and memoized for the process's lifetime (§5
/// "Freshness caching... MUST be scoped to one process lifetime"), mirroring
/// the source's global "rsync available" flag called out in the design notes
/// (§9) but modeled as an owned field rather than module-global state.
#[derive(Debug)]
pub struct RsyncTool {
    available: tokio::sync::OnceCell<bool>,
    timeout: Duration,
}

impl Default for RsyncTool {
    fn default() -> Self {
        Self::new()
    }
}

impl RsyncTool {
    pub fn new() -> Self {
        Self {
            available: tokio::sync::OnceCell::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

#[async_trait]
impl TreeSyncTool for RsyncTool {
    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                tokio::process::Command::new("rsync")
                    .arg("--version")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map(|status| status.success())
                    .unwrap_or(false)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn sync(&self, src: &Path, dst: &Path) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| EngineError::BackendError(format!("create {dst:?}: {e}")))?;

        // Trailing slash on src: copy contents of src into dst, not src itself.
        let src_arg = format!("{}/", src.to_string_lossy());
        let dst_arg = dst.to_string_lossy().to_string();
        let output = run(
            "rsync",
            &["-a", &src_arg, &dst_arg],
            Path::new("."),
            self.timeout,
        )
        .await?;
        ensure_success("rsync", output).map(drop)
    }
}

/// `tar`-backed [`ArchiveTool`]. Unused by the core itself (§1 "the engine
/// does not know how the bundle is serialized on the wire") but shipped
/// alongside the other real collaborators for backend implementations that
/// need to package/unpack a bundle for wire transfer.
#[derive(Clone, Debug, Default)]
pub struct TarArchiveTool {
    timeout: Duration,
}

impl TarArchiveTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

#[async_trait]
impl ArchiveTool for TarArchiveTool {
    #[instrument(skip(self))]
    async fn create(&self, src_dir: &Path, dst_archive: &Path) -> Result<(), EngineError> {
        let dst = dst_archive.to_string_lossy().to_string();
        let output = run(
            "tar",
            &["czf", &dst, "-C", &src_dir.to_string_lossy(), "."],
            Path::new("."),
            self.timeout,
        )
        .await?;
        ensure_success("tar create", output).map(drop)
    }

    #[instrument(skip(self))]
    async fn extract(&self, src_archive: &Path, dst_dir: &Path) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(dst_dir)
            .await
            .map_err(|e| EngineError::BackendError(format!("create {dst_dir:?}: {e}")))?;
        let src = src_archive.to_string_lossy().to_string();
        let output = run(
            "tar",
            &["xzf", &src, "-C", &dst_dir.to_string_lossy()],
            Path::new("."),
            self.timeout,
        )
        .await?;
        ensure_success("tar extract", output).map(drop)
    }
}
