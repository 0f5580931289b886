use crate::hash::X509Hasher;
use crate::orchestrator::{renewed_domains_from_env, Orchestrator, RunReport};
use crate::{Context, Result};
use std::path::Path;
use tracing::info;

pub fn run(config_path: &Path) -> Result<RunReport> {
    let session = super::open_locked_session(config_path)?;
    let renewed = renewed_domains_from_env();
    if renewed.is_empty() {
        info!("No renewed domains given, holding every configured domain on its archive");
    }

    let hasher = X509Hasher::new();
    let orchestrator = Orchestrator::new(&session, &hasher)?;
    let report = orchestrator
        .run_pre(&renewed)
        .context("Pre-hook failed")?;

    super::print_summary("pre", &report);
    Ok(report)
}
