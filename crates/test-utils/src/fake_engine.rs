#![allow(dead_code)]

//! Scripted stand-ins for the simulation engine.
//!
//! A [`FakeEngine`] is a POSIX `sh` script run through the real
//! `SubprocessBackend` as `sh <script> {workspace} {suffix} {stem}`. What it
//! does is chosen per job suffix. Every invocation appends to a record file
//! outside the workspace, so tests can check where and when it ran.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use simbatch::errors::Result;
use simbatch::exec::{ExecutionBackend, ProcessHandle};
use simbatch::job::JobSpec;
use simbatch::types::BackendKind;
use simbatch::workspace::Workspace;

/// What the fake engine does for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    /// Log progress, sleep, write the success marker, exit with `exit_code`.
    Succeed { delay_ms: u64, exit_code: i32 },
    /// Write the final-results file without a success marker, exit 0.
    WriteWithoutMarker,
    /// Exit with `exit_code` without writing final results.
    Crash { exit_code: i32 },
    /// Log progress, then never finish.
    Hang,
    /// Start a background child (recorded as `child <suffix> <pid>`), then
    /// never finish.
    SpawnChildAndHang,
    /// Write the success marker, then keep running.
    SucceedAndLinger,
    /// Write `line` to the incremental log, then keep running.
    ReportInLog { line: String },
}

impl Behaviour {
    pub fn succeed() -> Self {
        Behaviour::Succeed {
            delay_ms: 100,
            exit_code: 0,
        }
    }

    fn body(&self) -> String {
        match self {
            Behaviour::Succeed {
                delay_ms,
                exit_code,
            } => format!(
                "progress 06:00:00\n  sleep {}\n  progress 18:00:00\n  finish 'Finished Successfully'\n  exit {exit_code}",
                seconds(*delay_ms)
            ),
            Behaviour::WriteWithoutMarker => {
                "progress 06:00:00\n  finish 'HDF5 results (incomplete)'\n  exit 0".to_string()
            }
            Behaviour::Crash { exit_code } => {
                format!("progress 03:00:00\n  record end\n  exit {exit_code}")
            }
            Behaviour::Hang => "progress 12:00:00\n  sleep 1000".to_string(),
            Behaviour::SpawnChildAndHang => {
                "sleep 1000 &\n  record \"child $!\"\n  progress 12:00:00\n  wait".to_string()
            }
            Behaviour::SucceedAndLinger => {
                "progress 23:00:00\n  finish 'Finished Successfully'\n  sleep 1000".to_string()
            }
            Behaviour::ReportInLog { line } => {
                format!("printf '%s\\n' '{line}' >> \"$log\"\n  sleep 1000")
            }
        }
    }
}

fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Builder for a scripted engine.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    jobs: BTreeMap<String, Behaviour>,
    fallback: Behaviour,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            fallback: Behaviour::succeed(),
        }
    }

    pub fn job(mut self, suffix: &str, behaviour: Behaviour) -> Self {
        self.jobs.insert(suffix.to_string(), behaviour);
        self
    }

    pub fn otherwise(mut self, behaviour: Behaviour) -> Self {
        self.fallback = behaviour;
        self
    }

    fn script(&self, record: &Path) -> String {
        let mut s = String::new();
        s.push_str("#!/bin/sh\n");
        s.push_str("ws=\"$1\"; suffix=\"$2\"; stem=\"$3\"\n");
        s.push_str("log=\"$ws/$stem.bco$suffix\"\n");
        s.push_str("final=\"$ws/$stem.p$suffix.hdf\"\n");
        let _ = writeln!(s, "record() {{ echo \"$1 $suffix\" >> '{}'; }}", record.display());
        s.push_str("progress() { printf ' 01Jan2024  %s  Unsteady step\\n' \"$1\" >> \"$log\"; }\n");
        s.push_str("finish() { printf '%s\\n' \"$1\" > \"$final\"; record end; }\n");
        s.push_str("record \"start $(pwd)\"\n");
        s.push_str("case \"$suffix\" in\n");
        for (suffix, behaviour) in &self.jobs {
            let _ = writeln!(s, "  {suffix})\n  {}\n  ;;", behaviour.body());
        }
        let _ = writeln!(s, "  *)\n  {}\n  ;;", self.fallback.body());
        s.push_str("esac\n");
        s
    }

    /// Write the script and its record file into `dir`.
    pub fn install(&self, dir: &Path) -> InstalledEngine {
        let record = dir.join("engine-record.log");
        let script = dir.join("engine.sh");
        fs::write(&record, "").expect("create record file");
        fs::write(&script, self.script(&record)).expect("write engine script");
        InstalledEngine { script, record }
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// One line of the record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub event: String,
    pub detail: String,
    pub suffix: String,
}

/// A fake engine written to disk.
#[derive(Debug, Clone)]
pub struct InstalledEngine {
    pub script: PathBuf,
    pub record: PathBuf,
}

impl InstalledEngine {
    /// Body of an `[engine]` section running this script.
    pub fn engine_section(&self) -> String {
        format!(
            "backend = \"subprocess\"\nprogram = \"sh\"\nargs = [{:?}, \"{{workspace}}\", \"{{suffix}}\", \"{{stem}}\"]\n",
            self.script.to_string_lossy()
        )
    }

    /// Parsed record lines: `<event> [detail] <suffix>`.
    pub fn records(&self) -> Vec<Record> {
        fs::read_to_string(&self.record)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| {
                let mut words: Vec<&str> = line.split(' ').collect();
                let suffix = words.pop()?.to_string();
                let event = words.first()?.to_string();
                let detail = words.get(1..).map(|w| w.join(" ")).unwrap_or_default();
                Some(Record {
                    event,
                    detail,
                    suffix,
                })
            })
            .collect()
    }

    pub fn records_for(&self, suffix: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|r| r.suffix == suffix)
            .collect()
    }

    /// PIDs of background children started by `SpawnChildAndHang`.
    pub fn child_pids(&self) -> Vec<u32> {
        self.records()
            .into_iter()
            .filter(|r| r.event == "child")
            .filter_map(|r| r.detail.parse().ok())
            .collect()
    }
}

/// True while `pid` exists and is not a zombie.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        // state is the first field after the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// A backend whose launch panics, for checking that a broken pipeline
/// still yields a result.
#[derive(Debug, Default, Clone)]
pub struct PanickingBackend;

impl ExecutionBackend for PanickingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    fn launch<'a>(
        &'a self,
        _workspace: &'a Workspace,
        job: &'a JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + 'a>> {
        Box::pin(async move {
            let launched: Option<Result<ProcessHandle>> = None;
            launched.unwrap_or_else(|| panic!("scripted launch panic for job {}", job.id()))
        })
    }
}

/// A backend whose launch never finishes, standing in for an engine that
/// hangs while starting. Counts the launches it has entered.
#[derive(Debug, Default, Clone)]
pub struct StalledBackend {
    entered: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl StalledBackend {
    pub fn launches_entered(&self) -> usize {
        self.entered.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl ExecutionBackend for StalledBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    fn launch<'a>(
        &'a self,
        _workspace: &'a Workspace,
        _job: &'a JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + 'a>> {
        self.entered
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Box::pin(std::future::pending())
    }
}
