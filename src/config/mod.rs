//! Runtime configuration: the `+TURTLES <opts> -TURTLES` bracketed option
//! block embedded in a host's own argv, plus an optional on-disk defaults
//! file for operators who'd rather not thread options through the host's
//! command line at all.
//!
//! Loading precedence layers three sources (env/file/default), but
//! TURTLES has no environment variables of its own — precedence here is:
//! argv option block > defaults file > built-in defaults.

mod options;

pub use options::{extract_option_block, parse_options, OptionParseError};

use crate::error::{Result, TurtlesError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How the embedded store splits ephemeral and durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// `main` in-memory, `stage1` file-backed; finalizer moves settled rows.
    Staged,
    /// Only `main`, backed directly by file; finalizer is inert.
    Direct,
}

impl std::str::FromStr for CommitMode {
    type Err = OptionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "staged" => Ok(CommitMode::Staged),
            "direct" => Ok(CommitMode::Direct),
            other => Err(OptionParseError::InvalidValue {
                option: "commitMode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Whether the recorder actor is a dedicated OS thread or a cooperative
/// tokio task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Dedicated OS thread; mirrors a classic writer-thread actor
    /// writer thread.
    Mt,
    /// Cooperative tokio task, driven from an mpsc receiver loop.
    Ev,
}

impl std::str::FromStr for ScheduleMode {
    type Err = OptionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mt" => Ok(ScheduleMode::Mt),
            "ev" => Ok(ScheduleMode::Ev),
            other => Err(OptionParseError::InvalidValue {
                option: "scheduleMode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Effective TURTLES runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub enabled: bool,
    pub commit_mode: CommitMode,
    pub interval_millis: u64,
    pub db_path: PathBuf,
    pub db_prefix: String,
    pub schedule_mode: ScheduleMode,
    pub debug: bool,
    /// Fully-qualified names starting with this prefix are never traced,
    /// even while tracing is enabled. Not settable via the `+TURTLES`
    /// option block (it's a host-embedding concern, not a runtime knob) —
    /// a host builds its own `Config` and overrides it directly when its
    /// own namespace convention differs from `turtles::`.
    pub self_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            commit_mode: CommitMode::Staged,
            interval_millis: 30_000,
            db_path: PathBuf::from("./"),
            db_prefix: "turtles".to_string(),
            schedule_mode: ScheduleMode::Mt,
            debug: false,
            self_prefix: "turtles::".to_string(),
        }
    }
}

/// On-disk defaults file, loaded before the argv option block is applied.
/// Entirely optional: TURTLES runs fine with no file on disk at all.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    enabled: Option<bool>,
    commit_mode: Option<String>,
    interval_millis: Option<u64>,
    db_path: Option<String>,
    db_prefix: Option<String>,
    schedule_mode: Option<String>,
    debug: Option<bool>,
}

impl Config {
    /// Default path for the optional defaults file:
    /// `~/.config/turtles/config.toml`.
    pub fn defaults_file_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("turtles").join("config.toml"))
    }

    fn load_defaults_file(path: Option<&Path>) -> Result<FileConfig> {
        let Some(path) = path else {
            return Ok(FileConfig::default());
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                TurtlesError::Configuration(format!(
                    "failed to parse {}: {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(TurtlesError::Configuration(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Build a `Config` from a host argv slice: extract and parse the
    /// `+TURTLES ... -TURTLES` option block(s), layered over an optional
    /// defaults file and the built-in defaults. Returns the residual argv
    /// (with the bracketed blocks removed) alongside the effective config.
    ///
    /// Invalid `commitMode`/`scheduleMode` values or unknown option names
    /// are fatal (`TurtlesError::Configuration`).
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<(Config, Vec<String>)> {
        Self::from_argv_with_defaults_file(argv, Self::defaults_file_path().as_deref())
    }

    pub fn from_argv_with_defaults_file<S: AsRef<str>>(
        argv: &[S],
        defaults_file: Option<&Path>,
    ) -> Result<(Config, Vec<String>)> {
        let owned: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        let (residual, block) = extract_option_block(&owned);
        let parsed = parse_options(&block)
            .map_err(|e| TurtlesError::Configuration(e.to_string()))?;

        let file = Self::load_defaults_file(defaults_file)?;
        let mut config = Config {
            enabled: file.enabled.unwrap_or(false),
            commit_mode: match file.commit_mode {
                Some(s) => s
                    .parse()
                    .map_err(|e: OptionParseError| TurtlesError::Configuration(e.to_string()))?,
                None => CommitMode::Staged,
            },
            interval_millis: file.interval_millis.unwrap_or(30_000),
            db_path: file.db_path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./")),
            db_prefix: file.db_prefix.unwrap_or_else(|| "turtles".to_string()),
            schedule_mode: match file.schedule_mode {
                Some(s) => s
                    .parse()
                    .map_err(|e: OptionParseError| TurtlesError::Configuration(e.to_string()))?,
                None => ScheduleMode::Mt,
            },
            debug: file.debug.unwrap_or(false),
            self_prefix: "turtles::".to_string(),
        };

        parsed.apply(&mut config)?;

        Ok((config, residual))
    }

    /// Deterministic durable file path: `<dbPath>/<dbPrefix>-<pid>.db`.
    pub fn db_file_for_pid(&self, pid: u32) -> PathBuf {
        self.db_path.join(format!("{}-{}.db", self.db_prefix, pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_disabled() {
        let config = Config::default();
        assert!(!config.enabled);
        assert_eq!(config.commit_mode, CommitMode::Staged);
        assert_eq!(config.interval_millis, 30_000);
    }

    #[test]
    fn from_argv_parses_block_and_strips_it() {
        let argv = ["-i", "x", "+TURTLES", "-enabled", "-TURTLES", "-o", "y"];
        let (config, residual) = Config::from_argv_with_defaults_file(&argv, None).unwrap();
        assert!(config.enabled);
        assert_eq!(residual, vec!["-i", "x", "-o", "y"]);
    }

    #[test]
    fn unknown_option_is_fatal() {
        let argv = ["+TURTLES", "-bogus", "-TURTLES"];
        assert!(Config::from_argv_with_defaults_file(&argv, None).is_err());
    }

    #[test]
    fn invalid_commit_mode_is_fatal() {
        let argv = ["+TURTLES", "-commitMode", "nonsense", "-TURTLES"];
        assert!(Config::from_argv_with_defaults_file(&argv, None).is_err());
    }

    #[test]
    fn db_file_naming_is_deterministic() {
        let config = Config {
            db_path: PathBuf::from("/tmp/turtles"),
            db_prefix: "turtles".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.db_file_for_pid(4242),
            PathBuf::from("/tmp/turtles/turtles-4242.db")
        );
    }
}
