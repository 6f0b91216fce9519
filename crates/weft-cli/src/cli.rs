//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "weft",
    version,
    about = "Validate and run task graphs on the weft scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `weft.toml` in the current directory if it exists, otherwise
    /// built-in defaults.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WEFT_LOG` or `info` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check a graph file and print its execution order.
    Validate {
        /// Graph file (JSON).
        graph: PathBuf,
    },

    /// Execute a graph in-process against the in-memory store.
    Run {
        /// Graph file (JSON).
        graph: PathBuf,

        /// Number of workers.
        #[arg(long, default_value_t = 2)]
        workers: usize,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_worker_count_and_global_flags() {
        let args = CliArgs::try_parse_from([
            "weft",
            "run",
            "graph.json",
            "--workers",
            "4",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        match args.command {
            Command::Run { graph, workers } => {
                assert_eq!(graph, PathBuf::from("graph.json"));
                assert_eq!(workers, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn validate_needs_a_graph() {
        assert!(CliArgs::try_parse_from(["weft", "validate"]).is_err());
    }
}
