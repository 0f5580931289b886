pub mod lifecycle;
pub mod report;

pub use lifecycle::Orchestrator;
pub use report::{Action, RunReport, EXIT_CONFIG, EXIT_FAILURE, EXIT_LOCKED, EXIT_OK};

use std::collections::BTreeSet;

/// Space-separated list of renewed domains, set by the renewal client
pub const RENEWED_DOMAINS_VAR: &str = "RENEWED_DOMAINS";

/// Lowercased, without trailing dots; empty input means nothing renewed
pub fn parse_renewed_domains(value: &str) -> BTreeSet<String> {
    value
        .split_whitespace()
        .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

pub fn renewed_domains_from_env() -> BTreeSet<String> {
    std::env::var(RENEWED_DOMAINS_VAR)
        .map(|value| parse_renewed_domains(&value))
        .unwrap_or_default()
}
