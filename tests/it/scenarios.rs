//! One test per scenario in the design's testable-properties table
//! (properties 1-6, scenarios S1-S6).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use veendor::backend::BackendDescriptor;
use veendor::config::{Config, GitHistoryConfig};
use veendor::fingerprint::{Salt, fingerprint};
use veendor::mock::{MockBackend, MockNativePackageManager, MockSyncTool, MockVcs};
use veendor::manifest::Manifest;
use veendor::orchestrator::{InstallOrchestrator, InstallRequest, InstallSource};
use veendor::process::ProcessRunner;

fn write_manifest(dir: &Path, entries: &[(&str, &str)]) {
    let map: BTreeMap<_, _> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let body = serde_json::json!({ "dependencies": map });
    std::fs::write(dir.join("package.json"), body.to_string()).unwrap();
}

fn manifest_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let map: BTreeMap<_, _> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    serde_json::json!({ "dependencies": map }).to_string().into_bytes()
}

fn request(project_root: PathBuf, force: bool) -> InstallRequest {
    InstallRequest {
        project_root,
        manifest_path: PathBuf::from("package.json"),
        lockfile_path: None,
        force,
        cancellation: CancellationToken::new(),
    }
}

#[test_log::test(tokio::test)]
async fn s1_simple_pull_populates_from_the_hitting_backend() {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path(), &[("foo", "1.0.0")]);
    let manifest =
        Manifest::parse(&std::fs::read_to_string(project.path().join("package.json")).unwrap())
            .unwrap();
    let fp = fingerprint(&manifest, None, &Salt::default()).unwrap();

    let b0 = Arc::new(MockBackend::empty());
    let b1 = Arc::new(MockBackend::with_bundle(fp.clone(), vec![("pkg.js".into(), vec![1, 2, 3])]));
    let chain = vec![
        BackendDescriptor::new("b0", b0.clone(), serde_json::json!({}), true, false),
        BackendDescriptor::new("b1", b1.clone(), serde_json::json!({}), true, false),
    ];

    let process = ProcessRunner {
        vcs: Arc::new(MockVcs::not_a_repo()),
        native: Arc::new(MockNativePackageManager::new()),
        sync: Arc::new(MockSyncTool::unavailable()),
    };
    let orchestrator = InstallOrchestrator::new(chain, process, Config::default());

    let outcome = orchestrator
        .install(request(project.path().to_path_buf(), false))
        .await
        .unwrap();

    assert_eq!(outcome.source, InstallSource::Chain);
    assert_eq!(outcome.missed_backends, vec!["b0".to_string()]);
    assert!(project.path().join("node_modules/pkg.js").exists());
    assert_eq!(b0.push_count(), 1, "missed backend is pushed to");
    assert_eq!(b1.push_count(), 0, "the hitting backend is not re-pushed to");
}

#[test_log::test(tokio::test)]
async fn s2_chain_exhaustion_without_fallback_is_fatal_and_pushes_nothing() {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path(), &[("foo", "1.0.0")]);

    let b0 = Arc::new(MockBackend::empty());
    let chain = vec![BackendDescriptor::new("b0", b0.clone(), serde_json::json!({}), true, false)];

    let process = ProcessRunner {
        vcs: Arc::new(MockVcs::not_a_repo()),
        native: Arc::new(MockNativePackageManager::new()),
        sync: Arc::new(MockSyncTool::unavailable()),
    };
    let orchestrator = InstallOrchestrator::new(chain, process, Config::default());

    let err = orchestrator
        .install(request(project.path().to_path_buf(), false))
        .await
        .unwrap_err();

    assert!(matches!(err, veendor::EngineError::BundlesNotFound(_)));
    assert_eq!(b0.push_count(), 0);
    assert!(!project.path().join("node_modules").exists());
}

#[test_log::test(tokio::test)]
async fn s3_history_hit_reconciles_an_upgrade_via_install_only() {
    // current: foo unchanged, c upgraded to 2.2.9, baz unchanged.
    write_scenario_and_assert(
        &[("foo", "2.2.8"), ("c", "2.2.9"), ("baz", "6.6.6-dev")],
        |native| {
            let installs = native.installs.lock().unwrap();
            assert_eq!(installs.len(), 1);
            assert_eq!(installs[0].get("c"), Some(&"2.2.9".to_string()));
            assert!(native.uninstalls.lock().unwrap().is_empty());
        },
    )
    .await;
}

#[test_log::test(tokio::test)]
async fn s4_history_hit_reconciles_a_removal_via_uninstall_only() {
    // current: c removed entirely.
    write_scenario_and_assert(&[("foo", "2.2.8"), ("baz", "6.6.6-dev")], |native| {
        assert!(native.installs.lock().unwrap().is_empty());
        let uninstalls = native.uninstalls.lock().unwrap();
        assert_eq!(uninstalls.len(), 1);
        assert!(uninstalls[0].contains("c"));
    })
    .await;
}

/// Shared S3/S4 scaffolding: revision-1 has `c:1.0.0`, revision-2 has
/// `c:2.1.8` (both alongside unchanged `foo`/`baz`); the only backend holds
/// the revision-2 bundle. `current` is the live manifest under test.
async fn write_scenario_and_assert(
    current: &[(&str, &str)],
    assert_native: impl FnOnce(&MockNativePackageManager),
) {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path(), current);

    let rev1 = manifest_bytes(&[("foo", "2.2.8"), ("c", "1.0.0"), ("baz", "6.6.6-dev")]);
    let rev2_bytes = manifest_bytes(&[("foo", "2.2.8"), ("c", "2.1.8"), ("baz", "6.6.6-dev")]);
    let rev2 = Manifest::parse(&String::from_utf8(rev2_bytes.clone()).unwrap()).unwrap();
    let rev2_fp = fingerprint(&rev2, None, &Salt::default()).unwrap();

    let vcs = Arc::new(MockVcs::repo_with_revisions(vec![(1, rev1), (2, rev2_bytes)]));
    let native = Arc::new(MockNativePackageManager::new());

    let backend = Arc::new(MockBackend::with_bundle(rev2_fp, vec![("marker".into(), vec![])]));
    let chain = vec![BackendDescriptor::new(
        "b0",
        backend,
        serde_json::json!({}),
        true,
        false,
    )];

    let process = ProcessRunner {
        vcs,
        native: native.clone(),
        sync: Arc::new(MockSyncTool::unavailable()),
    };
    let config = Config {
        use_git_history: Some(GitHistoryConfig { depth: 2 }),
        ..Config::default()
    };
    let orchestrator = InstallOrchestrator::new(chain, process, config);

    let outcome = orchestrator
        .install(request(project.path().to_path_buf(), false))
        .await
        .unwrap();

    assert_eq!(outcome.source, InstallSource::History);
    assert_native(&native);
}

#[test_log::test(tokio::test)]
async fn s5_push_conflict_triggers_exactly_one_re_pull_and_then_succeeds() {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path(), &[("foo", "1.0.0")]);
    let manifest =
        Manifest::parse(&std::fs::read_to_string(project.path().join("package.json")).unwrap())
            .unwrap();
    let fp = fingerprint(&manifest, None, &Salt::default()).unwrap();

    let b0 = Arc::new(MockBackend::empty());
    b0.conflict_next_push(fp.clone());
    let b1 = Arc::new(MockBackend::with_bundle(fp.clone(), vec![("pkg.js".into(), vec![1])]));
    let chain = vec![
        BackendDescriptor::new("b0", b0.clone(), serde_json::json!({}), true, false),
        BackendDescriptor::new("b1", b1, serde_json::json!({}), true, false),
    ];

    let process = ProcessRunner {
        vcs: Arc::new(MockVcs::not_a_repo()),
        native: Arc::new(MockNativePackageManager::new()),
        sync: Arc::new(MockSyncTool::unavailable()),
    };
    let orchestrator = InstallOrchestrator::new(chain, process, Config::default());

    let outcome = orchestrator
        .install(request(project.path().to_path_buf(), false))
        .await
        .unwrap();

    assert!(outcome.re_pulled);
    // The rePull's own pull from b0 now succeeds directly (the racing
    // writer's bundle landed), so b0 is not pushed to a second time.
    assert_eq!(b0.push_count(), 1);
}

#[test_log::test(tokio::test)]
async fn s6_force_with_sync_tool_merges_instead_of_replacing() {
    let project = tempfile::tempdir().unwrap();
    write_manifest(project.path(), &[("foo", "1.0.0")]);

    let stale_node_modules = project.path().join("node_modules");
    std::fs::create_dir_all(&stale_node_modules).unwrap();
    std::fs::write(stale_node_modules.join("stale.marker"), b"old").unwrap();

    let manifest =
        Manifest::parse(&std::fs::read_to_string(project.path().join("package.json")).unwrap())
            .unwrap();
    let fp = fingerprint(&manifest, None, &Salt::default()).unwrap();

    let b0 = Arc::new(MockBackend::with_bundle(fp, vec![("pkg.js".into(), vec![9])]));
    let chain = vec![BackendDescriptor::new("b0", b0, serde_json::json!({}), true, false)];

    let process = ProcessRunner {
        vcs: Arc::new(MockVcs::not_a_repo()),
        native: Arc::new(MockNativePackageManager::new()),
        // Available: exercises the sync-merge branch of
        // `WorkspaceManager::install_retrieved_tree` rather than the
        // wholesale-move fallback.
        sync: Arc::new(MockSyncTool::available()),
    };
    let orchestrator = InstallOrchestrator::new(chain, process, Config::default());

    let outcome = orchestrator
        .install(request(project.path().to_path_buf(), true))
        .await
        .unwrap();

    assert_eq!(outcome.source, InstallSource::Chain);
    assert!(project.path().join("node_modules/pkg.js").exists());
    assert!(
        !project.path().join("node_modules/stale.marker").exists(),
        "the deferred clear must still run before the retrieved tree is merged in"
    );
}
