pub mod init;
pub mod post;
pub mod pre;
pub mod print;
pub mod reset;
pub mod status;

use crate::context::Session;
use crate::models::Config;
use crate::orchestrator::RunReport;
use crate::{Context, Result};
use colored::Colorize;
use std::path::Path;

/// Load the configuration and bind its targets
pub fn open_session(config_path: &Path) -> Result<Session> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    let session = Session::from_config(config)?;
    Ok(session)
}

/// Like [`open_session`], holding the process lock
pub fn open_locked_session(config_path: &Path) -> Result<Session> {
    let session = open_session(config_path)?.lock()?;
    Ok(session)
}

pub fn print_summary(phase: &str, report: &RunReport) {
    let headline = format!("danectl {}", phase);
    if report.is_success() {
        println!("{} {}", "✓".green(), headline.bold());
    } else {
        println!("{} {}", "✗".red(), headline.bold());
    }

    println!(
        "   published: {}  deleted: {}  skipped: {}  retry later: {}  failed: {}",
        report.published,
        report.deleted,
        report.skipped,
        report.recoverable.to_string().yellow(),
        if report.failures > 0 {
            report.failures.to_string().red()
        } else {
            report.failures.to_string().normal()
        }
    );

    for domain in &report.pivoted_to_live {
        println!("   {} {} now serves its live certificate", "↺".cyan(), domain);
    }
    for error in &report.errors {
        println!("   {} {}", "•".red(), error);
    }
}
