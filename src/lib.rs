// src/lib.rs

pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod harvest;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod types;
pub mod workspace;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::build_jobs;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Orchestrator, PipelineContext};
use crate::exec::build_backend;
use crate::job::{BatchResult, JobSpec};
use crate::types::ConcurrencyMode;
use crate::workspace::WorkspaceManager;

/// Build an orchestrator from a validated config.
///
/// Resolves the engine once for the whole batch, so an unavailable engine
/// fails here with `EngineUnavailable` before any workspace exists.
pub fn orchestrator_from_config(cfg: &ConfigFile, cleanup: bool) -> errors::Result<Orchestrator> {
    let backend = build_backend(&cfg.engine_settings()?)?;
    let workspaces = WorkspaceManager::new(&cfg.workspace_settings())?;

    Ok(Orchestrator::new(PipelineContext {
        workspaces: Arc::new(workspaces),
        backend,
        monitor: cfg.monitor_settings()?,
        harvester: Arc::new(cfg.harvester()?),
        supervisor: cfg.supervisor_settings()?,
        results_dir: cfg.config.results_dir.clone(),
        cleanup,
    }))
}

/// Scheduling mode after applying CLI overrides to the config.
fn effective_mode(args: &CliArgs, cfg: &ConfigFile) -> ConcurrencyMode {
    if args.sequential {
        return ConcurrencyMode::Sequential;
    }
    match args.max_concurrency {
        Some(n) => ConcurrencyMode::Parallel {
            max_concurrency: usize::from(n),
        },
        None => cfg.concurrency_mode(),
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the job catalog
/// - engine resolution and the orchestrator
/// - Ctrl-C handling
/// - the stdout summary and optional JSON report
///
/// Returns whether every job completed successfully.
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let jobs = build_jobs(&cfg, &args.jobs)?;
    let mode = effective_mode(&args, &cfg);

    if args.dry_run {
        print_dry_run(&cfg, &jobs, mode);
        return Ok(true);
    }

    let cleanup = cfg.config.cleanup && !args.no_cleanup;
    let orchestrator = orchestrator_from_config(&cfg, cleanup)?;

    // Ctrl-C → cancel the batch.
    {
        let handle = orchestrator.cancel_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; cancelling batch");
            handle.cancel();
        });
    }

    let batch = orchestrator
        .run_with_progress(
            jobs,
            mode,
            |result| println!("{}", result.summary_line()),
            |job, fraction| debug!(job = %job, percent = fraction * 100.0, "progress"),
        )
        .await?;

    print_summary(&batch);
    if let Some(path) = &args.report {
        write_report(&batch, path)
            .with_context(|| format!("writing report {}", path.display()))?;
    }

    Ok(batch.all_succeeded())
}

fn write_report(batch: &BatchResult, path: &std::path::Path) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), batch)?;
    info!(path = ?path, "report written");
    Ok(())
}

fn print_summary(batch: &BatchResult) {
    println!();
    println!(
        "{} succeeded, {} failed in {:.1}s",
        batch.succeeded(),
        batch.failed(),
        batch.elapsed.as_secs_f64()
    );
    for result in batch.results.iter() {
        for warning in &result.warnings {
            println!("  warning [{}]: {warning}", result.id);
        }
        if let Some(ws) = &result.workspace {
            println!("  workspace [{}]: {}", result.id, ws.display());
        }
    }
}

/// Simple dry-run output: print the resolved jobs.
fn print_dry_run(cfg: &ConfigFile, jobs: &[JobSpec], mode: ConcurrencyMode) {
    println!("simbatch dry-run");
    println!("  engine.backend = {}", cfg.engine.backend);
    println!("  engine.program = {}", cfg.engine.program);
    println!("  mode = {mode:?}");
    println!("  cleanup = {}", cfg.config.cleanup);
    println!();

    println!("jobs ({}):", jobs.len());
    for job in jobs {
        println!("  - {} ({})", job.id(), job.plan());
        println!("      project: {}", job.project_file().display());
        println!("      plan_file: {}", job.plan_file());
        if let Some(geom) = job.geometry_file() {
            println!("      geometry: {geom}");
        }
        if let Some(flow) = job.flow_file() {
            println!("      flow: {flow}");
        }
        if let Some(input) = job.external_input() {
            println!("      external_input: {}", input.display());
        }
        if let Some(window) = job.window() {
            println!("      window: {} .. {}", window.start, window.end);
        }
        println!("      timeout: {:?}", job.options().timeout);
        if let Some(cores) = job.options().max_cores {
            println!("      max_cores: {cores}");
        }
    }

    debug!("dry-run complete (no execution)");
}
