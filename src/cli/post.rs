use crate::hash::X509Hasher;
use crate::orchestrator::{renewed_domains_from_env, Orchestrator, RunReport};
use crate::{Context, Result};
use std::path::Path;
use tracing::info;

pub async fn run(config_path: &Path) -> Result<RunReport> {
    let session = super::open_locked_session(config_path)?;
    let renewed = renewed_domains_from_env();
    info!(
        renewed = renewed.len(),
        targets = session.targets().len(),
        "Starting post-hook"
    );

    let hasher = X509Hasher::new();
    let orchestrator = Orchestrator::new(&session, &hasher)?;
    let report = orchestrator
        .run_post(&renewed)
        .await
        .context("Post-hook failed")?;

    super::print_summary("post", &report);
    Ok(report)
}
