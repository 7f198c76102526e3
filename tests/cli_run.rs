// tests/cli_run.rs

#![cfg(unix)]

use std::fs;
use std::time::Duration;

use clap::Parser;
use simbatch::catalog::build_jobs;
use simbatch::cli::CliArgs;
use simbatch::errors::SimbatchError;
use simbatch::orchestrator_from_config;
use simbatch_test_utils::builders::{BatchHarness, ConfigBuilder, ProjectFixture};
use simbatch_test_utils::fake_engine::FakeEngine;
use simbatch_test_utils::{init_tracing, with_timeout_of};

const LIMIT: Duration = Duration::from_secs(30);

#[test]
fn missing_engine_fails_before_any_workspace_exists() {
    init_tracing();
    let harness = BatchHarness::new(&["01"]);
    let cfg = harness
        .config(
            "program = \"simbatch-no-such-engine\"\nsearch_paths = []\n",
            &["01"],
        )
        .load(harness.scratch());

    let err = orchestrator_from_config(&cfg, true).unwrap_err();
    assert!(matches!(err, SimbatchError::EngineUnavailable { .. }), "{err}");
    assert!(harness.workspaces_left().is_empty());
}

#[test]
fn job_selection_must_name_configured_jobs() {
    let harness = BatchHarness::new(&["01", "02", "03"]);
    let cfg = harness
        .config("program = \"sh\"\n", &["01", "02", "03"])
        .load(harness.scratch());

    let picked = build_jobs(&cfg, &["03".to_string(), "01".to_string()]).unwrap();
    let ids: Vec<_> = picked.iter().map(|j| j.id().to_string()).collect();
    assert_eq!(ids, vec!["01", "03"]);

    let err = build_jobs(&cfg, &["07".to_string()]).unwrap_err();
    assert!(matches!(err, SimbatchError::ConfigError(_)));
    assert!(err.to_string().contains("07"));
}

#[test]
fn catalog_reads_plan_details_from_the_plan_file() {
    let harness = BatchHarness::new(&["01"]);
    let cfg = harness
        .config("program = \"sh\"\n", &["01"])
        .load(harness.scratch());

    let jobs = build_jobs(&cfg, &[]).unwrap();
    let job = &jobs[0];
    assert_eq!(job.plan_file(), "model.p01");
    assert_eq!(job.geometry_file(), Some("g01"));
    assert_eq!(job.flow_file(), Some("u01"));
    let window = job.window().expect("simulation window");
    assert_eq!(window.end - window.start, chrono::Duration::days(1));
    assert_eq!(job.external_input(), Some(harness.project.external_input().as_path()));
}

#[tokio::test]
async fn dry_run_validates_without_touching_the_engine() {
    init_tracing();
    let harness = BatchHarness::new(&["01"]);
    let engine = FakeEngine::new().install(harness.scratch());
    let path = harness
        .config(engine.engine_section(), &["01"])
        .write(harness.scratch());

    let args = CliArgs::try_parse_from([
        "simbatch",
        "--config",
        path.to_str().unwrap(),
        "--dry-run",
    ])
    .unwrap();
    let ok = simbatch::run(args).await.unwrap();

    assert!(ok);
    assert!(engine.records().is_empty());
    assert!(harness.workspaces_left().is_empty());
}

#[tokio::test]
async fn run_writes_a_json_report_for_selected_jobs() {
    init_tracing();
    let harness = BatchHarness::new(&["01", "02"]);
    let engine = FakeEngine::new().install(harness.scratch());
    let path = harness
        .config(engine.engine_section(), &["01", "02"])
        .write(harness.scratch());
    let report = harness.scratch().join("report.json");

    let args = CliArgs::try_parse_from([
        "simbatch",
        "--config",
        path.to_str().unwrap(),
        "--job",
        "02",
        "--sequential",
        "--report",
        report.to_str().unwrap(),
    ])
    .unwrap();
    let ok = with_timeout_of(LIMIT, simbatch::run(args)).await.unwrap();
    assert!(ok);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "02");
    assert_eq!(results[0]["state"], "completed-success");
    assert!(engine.records_for("01").is_empty());
}

#[test]
fn invalid_config_is_rejected_at_load() {
    let project = ProjectFixture::new().with_plan("01", "plan01");
    let dir = tempfile::tempdir().unwrap();
    let path = ConfigBuilder::new("program = \"sh\"\n")
        .config("max_concurrency = 0")
        .job("01", &project, &[])
        .write(dir.path());

    let err = simbatch::config::load_and_validate(&path).unwrap_err();
    assert!(err.to_string().contains("max_concurrency"), "{err}");
}
