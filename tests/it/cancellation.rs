//! Cooperative cancellation (§5 "Cancellation"): a caller that cancels the
//! request's token before or during `install` gets `EngineError::Cancelled`
//! rather than a partially-applied install.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use veendor::EngineError;
use veendor::config::Config;
use veendor::mock::{MockBackend, MockNativePackageManager, MockSyncTool, MockVcs};
use veendor::orchestrator::{InstallOrchestrator, InstallRequest};
use veendor::process::ProcessRunner;

fn write_manifest(dir: &std::path::Path) {
    std::fs::write(
        dir.join("package.json"),
        serde_json::json!({ "dependencies": { "foo": "1.0.0" } }).to_string(),
    )
    .unwrap();
}

#[test_log::test(tokio::test)]
async fn a_pre_cancelled_token_fails_fast_without_touching_any_backend() {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path());

    let b0 = Arc::new(MockBackend::empty());
    b0.fail_if_called();
    let chain = vec![veendor::backend::BackendDescriptor::new(
        "b0",
        b0,
        serde_json::json!({}),
        true,
        false,
    )];

    let process = ProcessRunner {
        vcs: Arc::new(MockVcs::not_a_repo()),
        native: Arc::new(MockNativePackageManager::new()),
        sync: Arc::new(MockSyncTool::unavailable()),
    };
    let orchestrator = InstallOrchestrator::new(chain, process, Config::default());

    let token = CancellationToken::new();
    token.cancel();

    let err = orchestrator
        .install(InstallRequest {
            project_root: project.path().to_path_buf(),
            manifest_path: PathBuf::from("package.json"),
            lockfile_path: None,
            force: false,
            cancellation: token,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
}

#[test_log::test(tokio::test)]
async fn an_uncancelled_token_behaves_as_no_cancellation_was_requested() {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path());

    let manifest = veendor::Manifest::parse(
        &std::fs::read_to_string(project.path().join("package.json")).unwrap(),
    )
    .unwrap();
    let fp = veendor::fingerprint::fingerprint(
        &manifest,
        None,
        &veendor::fingerprint::Salt::default(),
    )
    .unwrap();

    let b0 = Arc::new(MockBackend::with_bundle(fp, vec![("pkg.js".into(), vec![1])]));
    let chain = vec![veendor::backend::BackendDescriptor::new(
        "b0",
        b0,
        serde_json::json!({}),
        true,
        false,
    )];

    let process = ProcessRunner {
        vcs: Arc::new(MockVcs::not_a_repo()),
        native: Arc::new(MockNativePackageManager::new()),
        sync: Arc::new(MockSyncTool::unavailable()),
    };
    let orchestrator = InstallOrchestrator::new(chain, process, Config::default());

    let outcome = orchestrator
        .install(InstallRequest {
            project_root: project.path().to_path_buf(),
            manifest_path: PathBuf::from("package.json"),
            lockfile_path: None,
            force: false,
            cancellation: CancellationToken::new(),
        })
        .await
        .unwrap();

    assert!(!outcome.re_pulled);
}
