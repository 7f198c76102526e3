// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `simbatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "simbatch",
    version,
    about = "Run batches of simulation plans in isolated workspaces.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Simbatch.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Simbatch.toml")]
    pub config: PathBuf,

    /// Run only this job (plan suffix). Repeatable.
    #[arg(long = "job", value_name = "SUFFIX")]
    pub jobs: Vec<String>,

    /// Run jobs one at a time, in catalog order.
    #[arg(long, conflicts_with = "max_concurrency")]
    pub sequential: bool,

    /// Maximum number of engines running at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrency: Option<u16>,

    /// Keep workspaces after the batch (their paths are reported).
    #[arg(long)]
    pub no_cleanup: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SIMBATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the job catalog, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the batch result as JSON to this file.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_jobs_and_overrides() {
        let args = CliArgs::try_parse_from([
            "simbatch",
            "--job",
            "01",
            "--job",
            "03",
            "--max-concurrency",
            "2",
            "--no-cleanup",
        ])
        .unwrap();
        assert_eq!(args.jobs, vec!["01", "03"]);
        assert_eq!(args.max_concurrency, Some(2));
        assert!(args.no_cleanup);
        assert_eq!(args.config, PathBuf::from("Simbatch.toml"));
    }

    #[test]
    fn sequential_conflicts_with_max_concurrency() {
        assert!(
            CliArgs::try_parse_from(["simbatch", "--sequential", "--max-concurrency", "2"])
                .is_err()
        );
        assert!(CliArgs::try_parse_from(["simbatch", "--max-concurrency", "0"]).is_err());
    }
}
