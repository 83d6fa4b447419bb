use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::api::ApiResponse;
use crate::checkpoint::CheckpointStore;
use crate::config::{AnalysisConfig, BatchConfig, Credentials, PollPolicy, SessionPolicy};
use crate::orchestrator::BatchOrchestrator;
use crate::session::SessionManager;
use crate::tests::mock_api::{JobScript, MockSimulationApi};

pub(super) fn regular_manifest(dir: &Path, name: &str, count: usize) -> PathBuf {
    let documents: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "type": "REGULAR",
                "settings": {"region": "USA", "universe": "TOP3000", "delay": 1},
                "regular": format!("alpha_{}", i)
            })
        })
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&documents).unwrap()).unwrap();
    path
}

pub(super) fn fast_config(concurrency: usize) -> BatchConfig {
    BatchConfig::new(concurrency).with_poll_policy(PollPolicy {
        max_poll_failures: 2,
        transport_retry_delay: Duration::from_secs(1),
        idle_poll_interval: Duration::from_secs(1),
    })
}

pub(super) fn orchestrator(mock: &Arc<MockSimulationApi>, config: BatchConfig) -> BatchOrchestrator {
    let session = Arc::new(SessionManager::new(
        mock.clone(),
        Credentials::new("me@example.com", "pw"),
        SessionPolicy::default(),
    ));
    BatchOrchestrator::new(session, config)
}

#[tokio::test(start_paused = true)]
async fn twelve_requests_pack_into_three_slots_and_all_complete() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = regular_manifest(dir.path(), "batch.json", 12);
    let mock = Arc::new(MockSimulationApi::new());

    let report = orchestrator(&mock, fast_config(3).with_multi_sim(5))
        .run(&[manifest.clone()])
        .await
        .unwrap();

    let mut sizes = mock.submission_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 5, 5]);

    let summary = &report.summaries[0];
    assert_eq!(summary.total, 12);
    assert_eq!(summary.successful, 12);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.produced_ids.len(), 12);
    assert!(report.is_clean());

    let store = CheckpointStore::for_manifest(&manifest, ".checkpoint");
    assert_eq!(store.load().len(), 12);
    let lines = std::fs::read_to_string(store.path()).unwrap().lines().count();
    assert_eq!(lines, 12);
}

#[tokio::test(start_paused = true)]
async fn super_request_downgrades_the_whole_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let mut documents: Vec<Value> = (0..14).map(|i| json!(format!("alpha_{}", i))).collect();
    documents.push(json!({"type": "SUPER", "combo": "combo_expr", "selection": "selection_expr"}));
    let manifest = dir.path().join("mixed.json");
    std::fs::write(&manifest, Value::Array(documents).to_string()).unwrap();
    let mock = Arc::new(MockSimulationApi::new());

    let report = orchestrator(&mock, fast_config(4).with_multi_sim(5))
        .run(&[manifest])
        .await
        .unwrap();

    assert_eq!(mock.submission_sizes(), vec![1; 15]);
    assert_eq!(report.summaries[0].successful, 15);
    let super_submission = mock
        .submissions()
        .into_iter()
        .find(|body| body["type"] == "SUPER")
        .unwrap();
    assert_eq!(super_submission["settings"]["selectionHandling"], "POSITIVE");
    assert_eq!(super_submission["settings"]["selectionLimit"], 100);
}

#[tokio::test(start_paused = true)]
async fn unparsable_manifest_is_skipped_and_the_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, r#"{"regular": "not a list"}"#).unwrap();
    let invalid = dir.path().join("invalid.json");
    std::fs::write(&invalid, r#"[{"regular": "x", "settings": {"delay": 3}}]"#).unwrap();
    let good = regular_manifest(dir.path(), "good.json", 3);
    let mock = Arc::new(MockSimulationApi::new());

    let report = orchestrator(&mock, fast_config(2))
        .run(&[broken.clone(), invalid, good])
        .await
        .unwrap();

    assert_eq!(report.skipped_manifests.len(), 2);
    assert_eq!(report.skipped_manifests[0].0, broken);
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].successful, 3);
    assert!(!report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let first = regular_manifest(dir.path(), "first.json", 4);
    let second = regular_manifest(dir.path(), "second.json", 4);
    let mock = Arc::new(MockSimulationApi::new());
    mock.set_expiry(0.0);
    mock.reject_credentials(true);

    let err = orchestrator(&mock, fast_config(2))
        .run(&[first.clone(), second])
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(mock.submissions().is_empty());
    assert!(CheckpointStore::for_manifest(&first, ".checkpoint").load().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_error_is_counted_but_not_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = regular_manifest(dir.path(), "batch.json", 6);
    let mock = Arc::new(MockSimulationApi::new());
    mock.script_job("alpha_2", JobScript::failing());

    let report = orchestrator(&mock, fast_config(3))
        .run(&[manifest.clone()])
        .await
        .unwrap();

    let summary = &report.summaries[0];
    assert_eq!(summary.successful, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(CheckpointStore::for_manifest(&manifest, ".checkpoint").load().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn oversized_server_wait_does_not_abort_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = regular_manifest(dir.path(), "batch.json", 3);
    let mock = Arc::new(MockSimulationApi::new());
    let oversized = ApiResponse::new(200, json!({})).with_retry_after(1e20);
    mock.script_get("/simulations/sim-1", vec![Ok(oversized.clone()), Ok(oversized.clone()), Ok(oversized)]);

    let report = orchestrator(&mock, fast_config(3))
        .run(&[manifest.clone()])
        .await
        .unwrap();

    let summary = &report.summaries[0];
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(CheckpointStore::for_manifest(&manifest, ".checkpoint").load().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn manifests_run_in_order_with_separate_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let first = regular_manifest(dir.path(), "first.json", 2);
    let second = regular_manifest(dir.path(), "second.json", 3);
    let mock = Arc::new(MockSimulationApi::new());

    let report = orchestrator(&mock, fast_config(1))
        .run(&[first.clone(), second.clone()])
        .await
        .unwrap();

    let order: Vec<&PathBuf> = report.summaries.iter().map(|summary| &summary.manifest).collect();
    assert_eq!(order, vec![&first, &second]);
    assert!(report.summaries[0].finished_at <= report.summaries[1].started_at);
    assert_eq!(CheckpointStore::for_manifest(&first, ".checkpoint").load().len(), 2);
    assert_eq!(CheckpointStore::for_manifest(&second, ".checkpoint").load().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn analysis_and_csv_export_follow_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = regular_manifest(dir.path(), "batch.json", 3);
    let csv_path = dir.path().join("results.csv");
    let mock = Arc::new(MockSimulationApi::new());
    mock.set_analysis("correlations/self", json!({"records": []}));

    let config = fast_config(2).with_analysis(AnalysisConfig {
        check_self_corr: true,
        ..AnalysisConfig::default()
    });
    let report = orchestrator(&mock, config)
        .with_results_csv(&csv_path)
        .run(&[manifest])
        .await
        .unwrap();

    assert_eq!(report.analyses.len(), 3);
    assert!(report.analyses.iter().all(|analysis| analysis.passed()));
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 4);
}
