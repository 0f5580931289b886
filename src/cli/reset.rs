use crate::hash::X509Hasher;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::{Context, Result};
use colored::Colorize;
use dialoguer::Confirm;
use std::path::Path;

/// Pivot every domain back to live and forget the lifecycle state.
///
/// TLSA records already published are left as they are.
pub fn run(config_path: &Path, yes: bool) -> Result<RunReport> {
    let session = super::open_locked_session(config_path)?;

    if !yes {
        println!(
            "{}",
            "⚠️  Pending publishes and deletions will be forgotten".yellow()
        );
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Reset state in {}?",
                session.config().state_file.display()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            println!("   Reset aborted");
            return Ok(RunReport::default());
        }
    }

    let hasher = X509Hasher::new();
    let orchestrator = Orchestrator::new(&session, &hasher)?;
    let report = orchestrator.reset().context("Reset failed")?;

    super::print_summary("reset", &report);
    Ok(report)
}
