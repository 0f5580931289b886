use crate::models::{Group, LifecycleState, Timestamp};
use crate::provider::short_hash;
use crate::state::StateStore;
use crate::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::json;
use std::path::Path;

pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let session = super::open_session(config_path)?;
    let store = StateStore::new(&session.config().state_file);
    let state = store
        .read()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;
    let dane = session.dane_directory()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&state))?);
        return Ok(());
    }

    if state.is_empty() {
        println!("{}", "No pending lifecycle records".green());
        return Ok(());
    }

    let ttl = i64::try_from(session.config().ttl).unwrap_or(i64::MAX);
    let now = session.now();

    for (domain, group) in &state.groups {
        if group.is_empty() {
            continue;
        }
        let pivot = match dane.is_pivoted(domain) {
            Ok(true) => "archive".yellow(),
            Ok(false) => "live".green(),
            Err(_) => "unknown".bright_black(),
        };
        let configured = if session.target(domain).is_some() {
            String::new()
        } else {
            format!(" {}", "(not configured)".red())
        };
        println!("{} [{}]{}", domain.cyan().bold(), pivot, configured);
        print_group(group, now, ttl);
        println!();
    }

    Ok(())
}

fn print_group(group: &Group, now: Timestamp, ttl: i64) {
    for pre in group.pre.iter().filter(|p| p.keep) {
        println!("   PRE   pending={}", pre.pending);
    }
    for post in group.post.iter().filter(|p| p.keep) {
        let phase = if post.pending {
            "publishing".yellow()
        } else if now - post.published_at < ttl {
            format!("waiting {}s", ttl - (now - post.published_at)).normal()
        } else {
            "ready to delete previous".blue()
        };
        println!(
            "   POST  {}  {}  since {}  {}",
            post.tlsa,
            short_hash(&post.hash),
            format_time(post.published_at),
            phase
        );
    }
    for del in group.delete.iter().filter(|d| d.keep) {
        println!(
            "   DEL   {}  {}  retries={}  since {}",
            del.tlsa,
            short_hash(&del.hash1),
            del.retries.to_string().red(),
            format_time(del.recorded_at)
        );
    }
}

fn format_time(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn to_json(state: &LifecycleState) -> serde_json::Value {
    let domains: Vec<serde_json::Value> = state
        .groups
        .values()
        .filter(|g| !g.is_empty())
        .map(|group| {
            json!({
                "domain": group.domain,
                "pre": group.pre.iter().filter(|p| p.keep).map(|p| json!({
                    "pending": p.pending,
                })).collect::<Vec<_>>(),
                "post": group.post.iter().filter(|p| p.keep).map(|p| json!({
                    "tlsa": p.tlsa.to_string(),
                    "pending": p.pending,
                    "published_at": p.published_at,
                    "hash": p.hash,
                })).collect::<Vec<_>>(),
                "delete": group.delete.iter().filter(|d| d.keep).map(|d| json!({
                    "tlsa": d.tlsa.to_string(),
                    "retries": d.retries,
                    "recorded_at": d.recorded_at,
                    "hash1": d.hash1,
                    "hash2": d.hash2,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({ "domains": domains })
}
