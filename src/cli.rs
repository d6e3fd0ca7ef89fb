//! Command-line surface for the `cluster` binary.
//!
//! A `clap`-derived `Cli` shape
//! (`src/cli.rs`), cut down from a subcommand dispatcher to the single
//! positional-argument tool this binary actually is.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Cluster the call graph recorded in a TURTLES store.
#[derive(Parser, Debug)]
#[command(name = "cluster")]
#[command(version)]
#[command(about = "Cluster a TURTLES call graph via maximum spanning forest", long_about = None)]
pub struct Cli {
    /// Path to the durable store file written by the recorder.
    pub db_file: PathBuf,

    /// Drop edges with fewer than this many settled calls.
    #[arg(long, default_value_t = 0)]
    pub cutoff: i64,

    /// Fold both call directions into each endpoint's neighbor weights
    /// instead of only the caller->callee direction.
    #[arg(long)]
    pub undirected: bool,

    /// Diagnostic verbosity level, independent of `-v`/`--verbose`.
    #[arg(long, default_value_t = 0)]
    pub verbosity: u8,

    /// Output rendering.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Number of simulated machines to partition the graph across.
    /// Defaults to the available parallelism, floored at 1.
    #[arg(long)]
    pub machines: Option<usize>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Simulated machine count: explicit `--machines`, else available
    /// parallelism, floored at 1.
    pub fn machine_count(&self) -> usize {
        self.machines.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::parse_from(["cluster", "db.sqlite"]);
        assert_eq!(cli.cutoff, 0);
        assert!(!cli.undirected);
        assert_eq!(cli.verbosity, 0);
        assert_eq!(cli.format, OutputFormat::Text);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from([
            "cluster",
            "db.sqlite",
            "--cutoff",
            "3",
            "--undirected",
            "--format",
            "json",
            "--machines",
            "4",
            "-vv",
        ]);
        assert_eq!(cli.cutoff, 3);
        assert!(cli.undirected);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.machine_count(), 4);
        assert_eq!(cli.verbose, 2);
    }
}
