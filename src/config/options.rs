//! Tokenizer/parser for the `+TURTLES <opts> -TURTLES` bracketed option
//! block. Multiple bracketed blocks in the same argv
//! concatenate their inner contents before parsing.

use super::{CommitMode, Config, ScheduleMode};
use thiserror::Error;

const BLOCK_OPEN: &str = "+TURTLES";
const BLOCK_CLOSE: &str = "-TURTLES";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionParseError {
    #[error("unknown turtles option: {0}")]
    UnknownOption(String),
    #[error("option {option} expects a value")]
    MissingValue { option: String },
    #[error("invalid value for {option}: {value}")]
    InvalidValue { option: String, value: String },
    #[error("unterminated +TURTLES block (missing -TURTLES)")]
    Unterminated,
}

/// Split a host argv into (residual argv, concatenated option tokens).
/// Every `+TURTLES ... -TURTLES` span is removed from the residual and its
/// inner tokens are appended, in order, to the extracted option list.
pub fn extract_option_block(argv: &[String]) -> (Vec<String>, Vec<String>) {
    let mut residual = Vec::with_capacity(argv.len());
    let mut extracted = Vec::new();

    let mut i = 0;
    while i < argv.len() {
        if argv[i] == BLOCK_OPEN {
            i += 1;
            while i < argv.len() && argv[i] != BLOCK_CLOSE {
                extracted.push(argv[i].clone());
                i += 1;
            }
            // If unterminated (i == argv.len()), the block's tokens were
            // still consumed into `extracted`; residual simply loses them.
            if i < argv.len() {
                i += 1; // skip the closing -TURTLES
            }
        } else {
            residual.push(argv[i].clone());
            i += 1;
        }
    }

    (residual, extracted)
}

/// A parsed, not-yet-applied set of option overrides. Kept separate from
/// `Config` so that "unknown option" and "invalid value" errors surface
/// before any defaults-file values are touched.
#[derive(Debug, Default)]
pub struct ParsedOptions {
    enabled: Option<bool>,
    commit_mode: Option<CommitMode>,
    interval_millis: Option<u64>,
    db_path: Option<String>,
    db_prefix: Option<String>,
    schedule_mode: Option<ScheduleMode>,
    debug: Option<bool>,
}

impl ParsedOptions {
    pub(super) fn apply(self, config: &mut Config) -> Result<(), OptionParseError> {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.commit_mode {
            config.commit_mode = v;
        }
        if let Some(v) = self.interval_millis {
            config.interval_millis = v;
        }
        if let Some(v) = self.db_path {
            config.db_path = v.into();
        }
        if let Some(v) = self.db_prefix {
            config.db_prefix = v;
        }
        if let Some(v) = self.schedule_mode {
            config.schedule_mode = v;
        }
        if let Some(v) = self.debug {
            config.debug = v;
        }
        Ok(())
    }
}

/// Parse a flat list of option tokens (as produced by
/// [`extract_option_block`]) into [`ParsedOptions`].
///
/// Boolean options (`enabled`, `debug`) are bare flags: `-enabled` sets it
/// true, `-disableEnabled`... is not a thing — there is no explicit way to
/// set a boolean false from the block — it's flag-only.
/// Value options (`commitMode`, `intervalMillis`, `dbPath`,
/// `dbPrefix`, `scheduleMode`) take the next token as their value.
pub fn parse_options(tokens: &[String]) -> Result<ParsedOptions, OptionParseError> {
    let mut opts = ParsedOptions::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        let name = token.strip_prefix('-').unwrap_or(token);

        match name {
            "enabled" => {
                opts.enabled = Some(true);
                i += 1;
            }
            "debug" => {
                opts.debug = Some(true);
                i += 1;
            }
            "commitMode" => {
                let value = next_value(tokens, &mut i, "commitMode")?;
                opts.commit_mode = Some(value.parse()?);
            }
            "intervalMillis" => {
                let value = next_value(tokens, &mut i, "intervalMillis")?;
                opts.interval_millis = Some(value.parse().map_err(|_| {
                    OptionParseError::InvalidValue {
                        option: "intervalMillis".to_string(),
                        value: value.clone(),
                    }
                })?);
            }
            "dbPath" => {
                let value = next_value(tokens, &mut i, "dbPath")?;
                opts.db_path = Some(value);
            }
            "dbPrefix" => {
                let value = next_value(tokens, &mut i, "dbPrefix")?;
                opts.db_prefix = Some(value);
            }
            "scheduleMode" => {
                let value = next_value(tokens, &mut i, "scheduleMode")?;
                opts.schedule_mode = Some(value.parse()?);
            }
            other => return Err(OptionParseError::UnknownOption(other.to_string())),
        }
    }
    Ok(opts)
}

fn next_value(
    tokens: &[String],
    i: &mut usize,
    option: &str,
) -> Result<String, OptionParseError> {
    let value = tokens
        .get(*i + 1)
        .cloned()
        .ok_or_else(|| OptionParseError::MissingValue {
            option: option.to_string(),
        })?;
    *i += 2;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_block() {
        let argv: Vec<String> = ["-i", "x", "+TURTLES", "-enabled", "-TURTLES", "-o", "y"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (residual, extracted) = extract_option_block(&argv);
        assert_eq!(residual, vec!["-i", "x", "-o", "y"]);
        assert_eq!(extracted, vec!["-enabled"]);
    }

    #[test]
    fn concatenates_multiple_blocks() {
        let argv: Vec<String> = [
            "+TURTLES",
            "-enabled",
            "-TURTLES",
            "-x",
            "+TURTLES",
            "-debug",
            "-TURTLES",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let (residual, extracted) = extract_option_block(&argv);
        assert_eq!(residual, vec!["-x"]);
        assert_eq!(extracted, vec!["-enabled", "-debug"]);
    }

    #[test]
    fn parses_value_options() {
        let tokens: Vec<String> = [
            "-enabled",
            "-commitMode",
            "direct",
            "-intervalMillis",
            "5000",
            "-scheduleMode",
            "ev",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let opts = parse_options(&tokens).unwrap();
        assert_eq!(opts.enabled, Some(true));
        assert_eq!(opts.commit_mode, Some(CommitMode::Direct));
        assert_eq!(opts.interval_millis, Some(5000));
        assert_eq!(opts.schedule_mode, Some(ScheduleMode::Ev));
    }

    #[test]
    fn unknown_option_errors() {
        let tokens = vec!["-bogus".to_string()];
        assert_eq!(
            parse_options(&tokens).unwrap_err(),
            OptionParseError::UnknownOption("bogus".to_string())
        );
    }

    #[test]
    fn missing_value_errors() {
        let tokens = vec!["-commitMode".to_string()];
        assert_eq!(
            parse_options(&tokens).unwrap_err(),
            OptionParseError::MissingValue {
                option: "commitMode".to_string()
            }
        );
    }
}
