use crate::hash::{HashProvider, X509Hasher};
use crate::models::CertSource;
use crate::{Context, Result};
use colored::Colorize;
use std::path::Path;

/// Print the TLSA records the live certificates call for.
///
/// Reads certificates only; DNS and the state file are not touched.
pub fn run(config_path: &Path, domain: Option<&str>) -> Result<()> {
    let session = super::open_session(config_path)?;
    let dane = session.dane_directory()?;
    let hasher = X509Hasher::new();

    let targets: Vec<_> = session
        .targets()
        .iter()
        .filter(|t| domain.map_or(true, |d| t.domain.eq_ignore_ascii_case(d)))
        .collect();
    if targets.is_empty() {
        anyhow::bail!("Domain '{}' is not configured", domain.unwrap_or_default());
    }

    let mut failed = 0;
    for target in targets {
        let triples = dane.triples(&target.domain).with_context(|| {
            format!(
                "No dane files for {} (run `danectl init` first)",
                target.domain
            )
        })?;

        for spec in &target.tlsa {
            match hasher.hash(spec, &triples, CertSource::Live) {
                Ok(hash) => println!("{}", spec.record_line(&hash)),
                Err(e) => {
                    failed += 1;
                    eprintln!("{} {}: {}", "✗".red(), spec, e);
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} record(s) could not be computed", failed);
    }
    Ok(())
}
