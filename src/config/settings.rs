// src/config/settings.rs

//! Turn a validated [`ConfigFile`] into the settings structs the runtime
//! components take.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::ConfigFile;
use crate::errors::{Result, SimbatchError};
use crate::exec::{EngineSettings, SupervisorSettings, discovery};
use crate::harvest::ResultHarvester;
use crate::monitor::MonitorSettings;
use crate::types::{ConcurrencyMode, ModeSetting};
use crate::workspace::WorkspaceSettings;

fn duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| SimbatchError::ConfigError(format!("{field}: {e}")))
}

/// Half the available cores, at least one.
pub fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

impl ConfigFile {
    pub fn concurrency_mode(&self) -> ConcurrencyMode {
        match self.config.mode {
            ModeSetting::Sequential => ConcurrencyMode::Sequential,
            ModeSetting::Parallel => ConcurrencyMode::Parallel {
                max_concurrency: self
                    .config
                    .max_concurrency
                    .unwrap_or_else(default_max_concurrency),
            },
        }
    }

    pub fn default_timeout(&self) -> Result<Duration> {
        duration("[config].timeout", &self.config.timeout)
    }

    pub fn supervisor_settings(&self) -> Result<SupervisorSettings> {
        Ok(SupervisorSettings {
            poll_interval: duration("[config].poll_interval", &self.config.poll_interval)?,
            exit_grace: duration("[config].exit_grace", &self.config.exit_grace)?,
        })
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let engine = &self.engine;
        Ok(EngineSettings {
            backend: engine.backend,
            program: engine.program.clone(),
            args: engine.args.clone(),
            max_cores_flag: Some(engine.max_cores_flag.clone()).filter(|f| !f.is_empty()),
            hide_flag: engine.hide_flag.clone().filter(|f| !f.is_empty()),
            search_paths: engine.search_paths.clone().unwrap_or_else(|| {
                discovery::DEFAULT_SEARCH_PATHS
                    .iter()
                    .map(PathBuf::from)
                    .collect()
            }),
            reply_timeout: duration("[engine].reply_timeout", &engine.reply_timeout)?,
        })
    }

    pub fn monitor_settings(&self) -> Result<Arc<MonitorSettings>> {
        let monitor = &self.monitor;
        let volume_error_pattern = monitor
            .volume_error_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| {
                SimbatchError::ConfigError(format!("[monitor].volume_error_pattern: {e}"))
            })?;

        Ok(Arc::new(MonitorSettings {
            final_results: monitor.final_results.clone(),
            progress_log: Some(monitor.progress_log.clone()).filter(|p| !p.is_empty()),
            success_markers: monitor
                .success_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
            failure_markers: monitor
                .failure_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
            volume_error_pattern,
            max_volume_error_percent: monitor.max_volume_error_percent,
        }))
    }

    /// The detailed log is only switched on when something reads it.
    pub fn workspace_settings(&self) -> WorkspaceSettings {
        let ws = &self.workspace;
        WorkspaceSettings {
            root: self.config.workspace_root.clone(),
            exclude: ws.exclude.clone(),
            reference_files: ws.reference_files.clone(),
            reference_marker: ws.reference_marker.clone(),
            activate_plan: ws.activate_plan,
            detailed_log: ws.detailed_log && !self.monitor.progress_log.is_empty(),
            skip_dirs: self.config.results_dir.iter().cloned().collect(),
        }
    }

    pub fn harvester(&self) -> Result<ResultHarvester> {
        ResultHarvester::new(self.harvest.patterns.clone())
    }
}
