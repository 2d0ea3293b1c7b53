//! Runtime configuration (§6): everything here has a default, and every
//! default can be overridden by CLI flag or environment variable, in the
//! style of `firezone-firezone`'s `Cli` structs (`rust/gateway/src/main.rs`,
//! `rust/bin-shared/src/http_health_check.rs`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// One element of a consistency ignore-range: either a single value or an
/// inclusive `(low, high)` pair (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreRangeElement {
    Single(i64),
    Range(i64, i64),
}

impl IgnoreRangeElement {
    pub fn contains(&self, value: i64) -> bool {
        match self {
            IgnoreRangeElement::Single(v) => *v == value,
            IgnoreRangeElement::Range(low, high) => (*low..=*high).contains(&value),
        }
    }
}

/// Parses a comma-separated ignore-range list such as `"5,10-20,42"`.
///
/// Per §6, a malformed element discards the *whole* list rather than just
/// that element, and a warning is logged — callers must not be able to end
/// up half-trusting a partially-parsed range.
pub fn parse_ignore_ranges(raw: &str) -> Vec<IgnoreRangeElement> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let mut elements = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let parsed = match part.split_once('-') {
            Some((low, high)) => match (low.trim().parse(), high.trim().parse()) {
                (Ok(low), Ok(high)) => Some(IgnoreRangeElement::Range(low, high)),
                _ => None,
            },
            None => part.parse().ok().map(IgnoreRangeElement::Single),
        };

        match parsed {
            Some(element) => elements.push(element),
            None => {
                tracing::warn!(
                    raw,
                    "malformed consistency ignore-range, ignoring the entire list"
                );
                return Vec::new();
            }
        }
    }

    elements
}

pub fn matches_any(ranges: &[IgnoreRangeElement], value: i64) -> bool {
    ranges.iter().any(|r| r.contains(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// CLI / environment configuration surface. Defaults match §6 exactly.
#[derive(Parser, Debug, Clone)]
#[command(name = "flow-managerd", about = "Flow-management admin daemon")]
pub struct Cli {
    /// Address the admin HTTP facade (§4.G) binds to.
    #[arg(long, env = "FLOW_MANAGER_BIND_ADDR", default_value = "0.0.0.0:8181")]
    pub bind_addr: SocketAddr,

    /// Directory the file-backed persistence box is stored under (§4.E).
    #[arg(
        long,
        env = "FLOW_MANAGER_PERSISTENCE_DIR",
        default_value = "/var/lib/flow-manager"
    )]
    pub persistence_dir: PathBuf,

    /// Capacity of the in-flight FlowMod record (§3); FIFO eviction above it.
    #[arg(long, env = "FLOWS_DICT_MAX_SIZE", default_value_t = 10_000)]
    pub flows_dict_max_size: usize,

    /// Poll interval while waiting for the persistence box to materialize (§4.E).
    #[arg(
        long,
        env = "BOX_RESTORE_TIMER",
        default_value = "100ms",
        value_parser = humantime::parse_duration,
    )]
    pub box_restore_timer: Duration,

    /// Poll budget before `get_data` fails with `PersistenceUnavailable` (§4.E).
    #[arg(long, env = "BOX_RESTORE_ATTEMPTS", default_value_t = 10)]
    pub box_restore_attempts: u32,

    /// Gates the consistency passes in `on_flow_stats` (§4.F, §9).
    #[arg(long, env = "ENABLE_CONSISTENCY_CHECK", default_value_t = false)]
    pub enable_consistency_check: bool,

    /// Cookie values/ranges exempt from consistency reconciliation (§3, §6).
    #[arg(long, env = "CONSISTENCY_COOKIE_IGNORED_RANGE", default_value = "")]
    pub consistency_cookie_ignored_range: String,

    /// table_id values/ranges exempt from consistency reconciliation (§3, §6).
    #[arg(long, env = "CONSISTENCY_TABLE_ID_IGNORED_RANGE", default_value = "")]
    pub consistency_table_id_ignored_range: String,

    #[arg(long, env = "FLOW_MANAGER_LOG_FORMAT", default_value_t = LogFormat::Human, value_enum)]
    pub log_format: LogFormat,
}

/// Resolved settings handed to the orchestrator: ignore-ranges have already
/// been parsed (and, if malformed, warned-about and discarded) once at
/// startup rather than on every consistency pass.
#[derive(Debug, Clone)]
pub struct Settings {
    pub flows_dict_max_size: usize,
    pub box_restore_timer: Duration,
    pub box_restore_attempts: u32,
    pub enable_consistency_check: bool,
    pub cookie_ignored_range: Vec<IgnoreRangeElement>,
    pub table_id_ignored_range: Vec<IgnoreRangeElement>,
}

impl From<&Cli> for Settings {
    fn from(cli: &Cli) -> Self {
        Self {
            flows_dict_max_size: cli.flows_dict_max_size,
            box_restore_timer: cli.box_restore_timer,
            box_restore_attempts: cli.box_restore_attempts,
            enable_consistency_check: cli.enable_consistency_check,
            cookie_ignored_range: parse_ignore_ranges(&cli.consistency_cookie_ignored_range),
            table_id_ignored_range: parse_ignore_ranges(&cli.consistency_table_id_ignored_range),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            flows_dict_max_size: 10_000,
            box_restore_timer: Duration::from_millis(100),
            box_restore_attempts: 10,
            enable_consistency_check: false,
            cookie_ignored_range: Vec::new(),
            table_id_ignored_range: Vec::new(),
        }
    }
}
