//! In-memory test doubles for the backend and process-runner contracts.
//!
//! Gated behind the `test-util` feature (and always available under
//! `#[cfg(test)]`) so integration tests in `tests/it/` can exercise the
//! orchestrator without any real backend, VCS, or package manager. Concrete
//! production implementations of these traits are out of scope for this
//! crate (§1).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{Backend, BackendOptions};
use crate::error::EngineError;
use crate::fingerprint::Fingerprint;
use crate::process::{NativePackageManager, TreeSyncTool, VcsProvider};

/// A backend backed by an in-memory map of fingerprint -> bundle contents.
pub struct MockBackend {
    bundles: Mutex<BTreeMap<Fingerprint, Vec<(String, Vec<u8>)>>>,
    /// Fingerprints that should report `BundleAlreadyExists` on the *next*
    /// push attempt, then succeed on the one after (simulates a concurrent
    /// writer winning the race once).
    conflict_once: Mutex<BTreeSet<Fingerprint>>,
    must_not_be_called: AtomicBool,
    push_count: AtomicUsize,
    pull_count: AtomicUsize,
}

impl MockBackend {
    pub fn empty() -> Self {
        Self {
            bundles: Mutex::new(BTreeMap::new()),
            conflict_once: Mutex::new(BTreeSet::new()),
            must_not_be_called: AtomicBool::new(false),
            push_count: AtomicUsize::new(0),
            pull_count: AtomicUsize::new(0),
        }
    }

    pub fn with_bundle(fingerprint: Fingerprint, files: Vec<(String, Vec<u8>)>) -> Self {
        let backend = Self::empty();
        backend.bundles.lock().unwrap().insert(fingerprint, files);
        backend
    }

    /// Mark this backend so that any `pull`/`push` call panics the test —
    /// used to assert a backend later in the chain is never consulted after
    /// an earlier hit (§8 property 3).
    pub fn fail_if_called(&self) {
        self.must_not_be_called.store(true, Ordering::SeqCst);
    }

    /// Arrange for the next push of `fingerprint` to report
    /// `BundleAlreadyExists` (simulating S5's concurrent-writer race).
    pub fn conflict_next_push(&self, fingerprint: Fingerprint) {
        self.conflict_once.lock().unwrap().insert(fingerprint);
    }

    pub fn push_count(&self) -> usize {
        self.push_count.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    pub fn has_bundle(&self, fingerprint: &Fingerprint) -> bool {
        self.bundles.lock().unwrap().contains_key(fingerprint)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn pull(
        &self,
        fingerprint: &Fingerprint,
        _options: &BackendOptions,
        cache_dir: &Path,
    ) -> Result<(), EngineError> {
        assert!(
            !self.must_not_be_called.load(Ordering::SeqCst),
            "mock backend was called but expected not to be"
        );
        self.pull_count.fetch_add(1, Ordering::SeqCst);

        let bundles = self.bundles.lock().unwrap();
        let Some(files) = bundles.get(fingerprint) else {
            return Err(EngineError::BundleNotFound {
                alias: String::new(),
                fingerprint: fingerprint.clone(),
            });
        };

        let node_modules = cache_dir.join("node_modules");
        tokio::fs::create_dir_all(&node_modules)
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?;
        for (name, content) in files {
            tokio::fs::write(node_modules.join(name), content)
                .await
                .map_err(|e| EngineError::BackendError(e.to_string()))?;
        }
        Ok(())
    }

    async fn push(
        &self,
        fingerprint: &Fingerprint,
        _options: &BackendOptions,
        _project_root: &Path,
    ) -> Result<(), EngineError> {
        assert!(
            !self.must_not_be_called.load(Ordering::SeqCst),
            "mock backend was called but expected not to be"
        );
        self.push_count.fetch_add(1, Ordering::SeqCst);

        let mut conflicts = self.conflict_once.lock().unwrap();
        if conflicts.remove(fingerprint) {
            // "Already exists" means exactly that: another writer's push
            // already landed, so a subsequent pull must now find it there.
            self.bundles
                .lock()
                .unwrap()
                .entry(fingerprint.clone())
                .or_insert_with(|| vec![("racing-writer.marker".into(), vec![])]);
            return Err(EngineError::BundleAlreadyExists {
                alias: String::new(),
                fingerprint: fingerprint.clone(),
            });
        }
        drop(conflicts);

        self.bundles
            .lock()
            .unwrap()
            .insert(fingerprint.clone(), vec![("pushed.marker".into(), vec![])]);
        Ok(())
    }

    async fn validate_options(
        &self,
        options: BackendOptions,
    ) -> Result<BackendOptions, EngineError> {
        Ok(options)
    }
}

/// A tree-sync tool double whose availability is fixed at construction.
pub struct MockSyncTool {
    available: bool,
}

impl MockSyncTool {
    pub fn available() -> Self {
        Self { available: true }
    }

    pub fn unavailable() -> Self {
        Self { available: false }
    }
}

#[async_trait]
impl TreeSyncTool for MockSyncTool {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn sync(&self, src: &Path, dst: &Path) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?;
        let mut entries = tokio::fs::read_dir(src)
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::BackendError(e.to_string()))?
        {
            let dst_path = dst.join(entry.file_name());
            tokio::fs::copy(entry.path(), &dst_path)
                .await
                .map_err(|e| EngineError::BackendError(e.to_string()))?;
        }
        Ok(())
    }
}

/// A VCS double serving a fixed sequence of historical manifest revisions
/// (index 0 = oldest-requested i.e. one commit back, and so on).
pub struct MockVcs {
    is_repo: bool,
    /// revisions_back (1-indexed) -> file content, if any existed at that
    /// revision.
    revisions: Mutex<BTreeMap<u32, Vec<u8>>>,
}

impl MockVcs {
    pub fn repo_with_revisions(revisions: Vec<(u32, Vec<u8>)>) -> Self {
        Self {
            is_repo: true,
            revisions: Mutex::new(revisions.into_iter().collect()),
        }
    }

    pub fn not_a_repo() -> Self {
        Self {
            is_repo: false,
            revisions: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl VcsProvider for MockVcs {
    async fn is_repository(&self, _project_root: &Path) -> Result<bool, EngineError> {
        Ok(self.is_repo)
    }

    async fn file_at_revision(
        &self,
        _project_root: &Path,
        _path: &Path,
        revisions_back: u32,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.revisions.lock().unwrap().get(&revisions_back).cloned())
    }
}

/// A native package manager double that records install/uninstall calls
/// instead of invoking any real tool.
#[derive(Default)]
pub struct MockNativePackageManager {
    pub installs: Mutex<Vec<BTreeMap<String, String>>>,
    pub uninstalls: Mutex<Vec<BTreeSet<String>>>,
    pub install_all_count: AtomicUsize,
}

impl MockNativePackageManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NativePackageManager for MockNativePackageManager {
    async fn install(
        &self,
        _project_root: &Path,
        specs: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        self.installs.lock().unwrap().push(specs.clone());
        Ok(())
    }

    async fn uninstall(
        &self,
        _project_root: &Path,
        names: &BTreeSet<String>,
    ) -> Result<(), EngineError> {
        self.uninstalls.lock().unwrap().push(names.clone());
        Ok(())
    }

    async fn install_all(&self, _project_root: &Path) -> Result<(), EngineError> {
        self.install_all_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
