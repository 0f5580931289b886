//! StateStore - line-oriented persistence of lifecycle records

use crate::error::{DaneResult, Error};
use crate::models::{
    DeleteRecord, LifecycleRecord, LifecycleState, PostRecord, PreRecord, TlsaSpec,
};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Which hook is writing the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    PreHook,
    /// Pre records that are no longer pending are not written
    PostHook,
}

/// State file holding one lifecycle record per line:
///
/// ```text
/// PRE  <domain> <ordinal> <pending>
/// POST <domain> <ordinal> <usage> <selector> <matching> <port> <protocol> <pending> <marked> <published> <hash>
/// DEL  <domain> <ordinal> <usage> <selector> <matching> <port> <protocol> <retries> <recorded> <hash1> [<hash2>]
/// ```
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing file is an empty state; any line that
    /// does not parse fails the whole read.
    pub fn read(&self) -> DaneResult<LifecycleState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet");
                return Ok(LifecycleState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = LifecycleState::default();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let record = parse_record(line).map_err(|reason| Error::StateParse {
                path: self.path.clone(),
                line: idx + 1,
                reason,
            })?;
            state.push(record);
        }

        Ok(state)
    }

    /// Persist every record with `keep` set, in stable ordinal order.
    ///
    /// Ordinals are renumbered from zero, so writing back an unchanged
    /// state reproduces the file byte for byte. The file is replaced
    /// atomically.
    pub fn write(&self, mode: WriteMode, state: &LifecycleState) -> DaneResult<()> {
        let mut records: Vec<LifecycleRecord> = state
            .groups
            .values()
            .flat_map(|g| g.records())
            .filter(|r| r.keep())
            .filter(|r| match (mode, r) {
                (WriteMode::PostHook, LifecycleRecord::Pre(pre)) => pre.pending,
                _ => true,
            })
            .collect();
        records.sort_by_key(|r| r.ordinal());

        let mut content = String::new();
        for (ordinal, record) in records.iter().enumerate() {
            content.push_str(&format_record(record, ordinal));
            content.push('\n');
        }

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), records = records.len(), "Wrote state file");
        Ok(())
    }

    /// Remove the state file
    pub fn clear(&self) -> DaneResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Render one record as a state line, using `ordinal` as its position
pub fn format_record(record: &LifecycleRecord, ordinal: usize) -> String {
    match record {
        LifecycleRecord::Pre(r) => {
            format!("PRE {} {} {}", r.domain, ordinal, flag(r.pending))
        }
        LifecycleRecord::Post(r) => format!(
            "POST {} {} {} {} {} {} {}",
            r.domain,
            ordinal,
            format_spec(&r.tlsa),
            flag(r.pending),
            flag(r.marked),
            r.published_at,
            r.hash
        ),
        LifecycleRecord::Delete(r) => {
            let mut line = format!(
                "DEL {} {} {} {} {} {}",
                r.domain,
                ordinal,
                format_spec(&r.tlsa),
                r.retries,
                r.recorded_at,
                r.hash1
            );
            if let Some(hash2) = &r.hash2 {
                line.push(' ');
                line.push_str(hash2);
            }
            line
        }
    }
}

fn format_spec(spec: &TlsaSpec) -> String {
    format!(
        "{} {} {} {} {}",
        spec.usage, spec.selector, spec.matching, spec.port, spec.protocol
    )
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Parse one non-empty state line
pub fn parse_record(line: &str) -> Result<LifecycleRecord, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (tag, rest) = fields
        .split_first()
        .ok_or_else(|| "empty record".to_string())?;

    match *tag {
        "PRE" => {
            let [domain, ordinal, pending] = rest else {
                return Err(format!("PRE record needs 3 fields, found {}", rest.len()));
            };
            Ok(LifecycleRecord::Pre(PreRecord {
                domain: parse_domain(domain)?,
                ordinal: parse_num(ordinal, "ordinal")?,
                pending: parse_flag(pending, "pending")?,
                keep: true,
            }))
        }
        "POST" => {
            let [domain, ordinal, usage, selector, matching, port, protocol, pending, marked, published, hash] =
                rest
            else {
                return Err(format!("POST record needs 11 fields, found {}", rest.len()));
            };
            let domain = parse_domain(domain)?;
            Ok(LifecycleRecord::Post(PostRecord {
                ordinal: parse_num(ordinal, "ordinal")?,
                tlsa: parse_spec([usage, selector, matching, port, protocol], &domain)?,
                pending: parse_flag(pending, "pending")?,
                marked: parse_flag(marked, "marked")?,
                published_at: parse_num(published, "timestamp")?,
                hash: parse_hash(hash)?,
                keep: true,
                domain,
            }))
        }
        "DEL" => {
            if rest.len() != 10 && rest.len() != 11 {
                return Err(format!(
                    "DEL record needs 10 or 11 fields, found {}",
                    rest.len()
                ));
            }
            let domain = parse_domain(rest[0])?;
            Ok(LifecycleRecord::Delete(DeleteRecord {
                ordinal: parse_num(rest[1], "ordinal")?,
                tlsa: parse_spec([&rest[2], &rest[3], &rest[4], &rest[5], &rest[6]], &domain)?,
                retries: parse_num(rest[7], "retry count")?,
                recorded_at: parse_num(rest[8], "timestamp")?,
                hash1: parse_hash(rest[9])?,
                hash2: rest.get(10).map(|h| parse_hash(h)).transpose()?,
                keep: true,
                domain,
            }))
        }
        other => Err(format!("unknown record kind '{}'", other)),
    }
}

fn parse_domain(value: &str) -> Result<String, String> {
    if value.is_empty() || value.contains('/') {
        return Err(format!("invalid domain '{}'", value));
    }
    Ok(value.to_string())
}

fn parse_num<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid {} '{}'", what, value))
}

fn parse_flag(value: &str, what: &str) -> Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("invalid {} flag '{}'", what, other)),
    }
}

fn parse_hash(value: &str) -> Result<String, String> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid hash '{}'", value));
    }
    Ok(value.to_ascii_lowercase())
}

fn parse_spec(fields: [&&str; 5], domain: &str) -> Result<TlsaSpec, String> {
    let [usage, selector, matching, port, protocol] = fields;
    TlsaSpec::new(
        parse_num(usage, "usage")?,
        parse_num(selector, "selector")?,
        parse_num(matching, "matching type")?,
        parse_num(port, "port")?,
        *protocol,
        domain,
    )
    .map_err(|e| e.to_string())
}
