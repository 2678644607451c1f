//! Command-line surface.
//!
//! The runner is started by orchestration tooling that may pass flags meant
//! for other processes, so argv is filtered before clap sees it: unknown
//! flags are dropped, and so are values that do not parse. The set of known
//! flags and their value parsers come from the [`Cli`] definition itself.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::builder::NonEmptyStringValueParser;
use clap::{Command, CommandFactory, Parser};
use tracing::warn;

use crate::config::Overrides;

#[derive(Parser, Debug, Default, PartialEq)]
#[command(
    name = "medtrack-e2e",
    about = "Continuous end-to-end test runner for MedicineTrack services",
    version,
    long_about = None
)]
pub struct Cli {
    /// Stop triggering test runs after N runs (health pings continue)
    #[arg(long, value_name = "N")]
    pub runs: Option<u32>,

    /// Minutes between test runs
    #[arg(long, value_name = "MINUTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Wait one interval before the first run instead of running immediately
    #[arg(long)]
    pub no_startup: bool,

    /// Run tests one at a time, pausing between them
    #[arg(long, overrides_with = "batch")]
    pub individual: bool,

    /// Run every test back to back (the last of --individual/--batch wins)
    #[arg(long, overrides_with = "individual")]
    pub batch: bool,

    /// Seconds between tests in individual mode
    #[arg(long, value_name = "SECONDS")]
    pub cadence: Option<u64>,

    /// Seconds to wait at the start of every run
    #[arg(long, value_name = "SECONDS")]
    pub initial_delay: Option<u64>,

    /// Only run tests whose name contains TEXT (repeatable, case-insensitive)
    #[arg(long = "filter", value_name = "TEXT", value_parser = NonEmptyStringValueParser::new())]
    pub filters: Vec<String>,

    /// Config file (default: $MEDTRACK_E2E_CONFIG, then ./medtrack-e2e.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Parse the process arguments after filtering them.
    pub fn parse_lenient() -> Self {
        Self::parse_from(normalize_args(std::env::args()))
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            max_runs: self.runs,
            interval_minutes: self.interval,
            no_startup: self.no_startup,
            individual: if self.individual {
                Some(true)
            } else if self.batch {
                Some(false)
            } else {
                None
            },
            cadence_seconds: self.cadence,
            initial_delay_seconds: self.initial_delay,
            filters: self.filters.clone(),
            json_logs: self.json_logs,
        }
    }
}

/// Every flag `command` accepts, mapped to whether it takes a value.
fn known_flags(command: &Command) -> HashMap<String, bool> {
    let mut flags = HashMap::new();
    for arg in command.get_arguments() {
        let takes_value = arg.get_action().takes_values();
        if let Some(long) = arg.get_long() {
            flags.insert(format!("--{long}"), takes_value);
        }
        if let Some(short) = arg.get_short() {
            flags.insert(format!("-{short}"), takes_value);
        }
    }
    flags
}

/// Whether `command` would accept `value` for `flag` on its own.
fn value_ok(command: &Command, flag: &str, value: &str) -> bool {
    command
        .clone()
        .try_get_matches_from([command.get_name().to_string(), format!("{flag}={value}")])
        .is_ok()
}

/// Keep only recognised flags with well-formed values. A value flag always
/// consumes the following argument, even when that value is then dropped.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut command = Cli::command();
    command.build();
    let flags = known_flags(&command);

    let mut args = args.into_iter();
    let mut out: Vec<String> = args.next().into_iter().collect();
    let rest: Vec<String> = args.collect();

    let mut i = 0;
    while i < rest.len() {
        let arg = rest[i].as_str();
        i += 1;

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
            _ => (arg, None),
        };

        match flags.get(flag) {
            Some(false) if inline.is_none() => out.push(flag.to_string()),
            Some(false) => warn!(arg, "ignoring value given to a switch"),
            Some(true) => {
                let value = match inline {
                    Some(v) => Some(v),
                    None => {
                        let next = rest.get(i).map(String::as_str);
                        if next.is_some() {
                            i += 1;
                        }
                        next
                    }
                };
                match value {
                    Some(v) if value_ok(&command, flag, v) => {
                        out.push(flag.to_string());
                        out.push(v.to_string());
                    }
                    _ => warn!(flag, value = value.unwrap_or(""), "ignoring malformed argument"),
                }
            }
            None => warn!(arg, "ignoring unknown argument"),
        }
    }
    out
}
