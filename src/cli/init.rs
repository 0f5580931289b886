use crate::{Context, Result};
use colored::Colorize;
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> Result<()> {
    let session = super::open_locked_session(config_path)?;
    let dane = session.dane_directory()?;

    let report = dane
        .initialize(force, &session.domains())
        .with_context(|| format!("Failed to initialize {}", dane.root().display()))?;

    println!(
        "{} {}",
        "Dane directory:".cyan().bold(),
        dane.root().display()
    );
    for (domain, triples) in &report.inventory {
        let configured = session.target(domain).is_some();
        let label = if configured {
            domain.green().bold()
        } else {
            domain.bright_black()
        };
        println!("   {}", label);
        for triple in triples {
            println!(
                "      {} -> {}",
                triple.file_name().unwrap_or("?"),
                triple.archive.display()
            );
        }
    }

    if !report.errors.is_empty() {
        for error in &report.errors {
            println!("   {} {}", "✗".red(), error);
        }
        anyhow::bail!("failed to mirror {} live directories", report.errors.len());
    }

    Ok(())
}
