//! DNS provider contract and bindings
//!
//! Every Target binds exactly one provider when the configuration is
//! loaded. Available bindings:
//! - [`ExecProvider`] - runs a local command per operation
//! - [`CloudflareProvider`] - Cloudflare v4 HTTP API

mod cloudflare;
mod exec;

pub use cloudflare::{CloudflareConfig, CloudflareProvider};
pub use exec::{ExecConfig, ExecProvider};

use crate::error::{DaneResult, Error};
use crate::models::TlsaSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Lowercase hex hash -> provider record id
pub type LiveRecords = BTreeMap<String, String>;

/// Result of a provider or orchestrator step.
///
/// `AlreadyUp` and `NotLive` are expected states that get retried later;
/// only `Processing` and `Internal` make the run fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyUp(String),
    NotLive(String),
    Recoverable(String),
    Processing(String),
    Internal(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Counts toward a non-zero exit status
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Processing(_) | Outcome::Internal(_))
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Outcome::AlreadyUp(_) | Outcome::NotLive(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::AlreadyUp(_) => "already-up",
            Outcome::NotLive(_) => "not-live",
            Outcome::Recoverable(_) => "recoverable-error",
            Outcome::Processing(_) => "processing-error",
            Outcome::Internal(_) => "internal-error",
        }
    }
}

impl From<Error> for Outcome {
    fn from(err: Error) -> Self {
        match err {
            Error::Internal(msg) => Outcome::Internal(msg),
            other => Outcome::Processing(other.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::AlreadyUp(msg)
            | Outcome::NotLive(msg)
            | Outcome::Recoverable(msg)
            | Outcome::Processing(msg)
            | Outcome::Internal(msg) => write!(f, "{}: {}", self.label(), msg),
        }
    }
}

/// Operations a DNS backend offers for TLSA records
#[async_trait]
pub trait DnsProvider: Send + Sync + fmt::Debug {
    /// Provider name used in logs (e.g. "exec", "cloudflare")
    fn name(&self) -> &'static str;

    /// Publish `hash` under the owner name of `spec`.
    ///
    /// Must be idempotent or self-reporting: publishing a hash that is
    /// already present returns `AlreadyUp`.
    async fn publish(&self, spec: &TlsaSpec, hash: &str) -> Outcome;

    /// Published hashes for `spec`; an empty set is `Err(Outcome::NotLive)`
    async fn read(&self, spec: &TlsaSpec) -> Result<LiveRecords, Outcome>;

    /// Delete the record identified by the provider's opaque `record_id`
    async fn delete(&self, spec: &TlsaSpec, record_id: &str) -> Outcome;

    /// Delete `hash1`, but only after a read confirmed it is published and,
    /// when given, that `hash2` (its replacement) is published too.
    async fn delete_if_up(&self, spec: &TlsaSpec, hash1: &str, hash2: Option<&str>) -> Outcome {
        let live = match self.read(spec).await {
            Ok(live) => live,
            Err(outcome) => return outcome,
        };

        if let Some(hash2) = hash2 {
            if !live.contains_key(&hash2.to_ascii_lowercase()) {
                return Outcome::NotLive(format!(
                    "replacement {} is not published for {}",
                    short_hash(hash2),
                    spec.owner_name()
                ));
            }
        }

        match live.get(&hash1.to_ascii_lowercase()) {
            Some(record_id) => {
                debug!(tlsa = %spec, record_id = %record_id, "Deleting confirmed TLSA record");
                self.delete(spec, record_id).await
            }
            None => Outcome::NotLive(format!(
                "{} is not published for {}",
                short_hash(hash1),
                spec.owner_name()
            )),
        }
    }
}

/// Provider binding as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Exec(ExecConfig),
    Cloudflare(CloudflareConfig),
}

impl ProviderConfig {
    /// Bind the provider; called once per Target at load time
    pub fn build(&self, domain: &str) -> DaneResult<Box<dyn DnsProvider>> {
        match self {
            ProviderConfig::Exec(config) => Ok(Box::new(ExecProvider::new(config)?)),
            ProviderConfig::Cloudflare(config) => {
                Ok(Box::new(CloudflareProvider::new(config, domain)?))
            }
        }
    }
}

/// First 12 hex digits, enough to tell hashes apart in logs
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Provider whose read result is fixed and which records deletes
    #[derive(Debug)]
    struct FixedProvider {
        live: LiveRecords,
        deleted: Mutex<Vec<String>>,
    }

    impl FixedProvider {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                live: entries
                    .iter()
                    .map(|(h, id)| (h.to_string(), id.to_string()))
                    .collect(),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DnsProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn publish(&self, _spec: &TlsaSpec, _hash: &str) -> Outcome {
            Outcome::Success
        }

        async fn read(&self, _spec: &TlsaSpec) -> Result<LiveRecords, Outcome> {
            if self.live.is_empty() {
                return Err(Outcome::NotLive("no records".to_string()));
            }
            Ok(self.live.clone())
        }

        async fn delete(&self, _spec: &TlsaSpec, record_id: &str) -> Outcome {
            self.deleted.lock().unwrap().push(record_id.to_string());
            Outcome::Success
        }
    }

    fn spec() -> TlsaSpec {
        TlsaSpec::parse("311 443 tcp", "example.com").unwrap()
    }

    #[tokio::test]
    async fn test_delete_if_up_requires_replacement() {
        let provider = FixedProvider::new(&[("h1", "id1")]);
        let outcome = provider.delete_if_up(&spec(), "h0", Some("h1")).await;
        assert!(matches!(outcome, Outcome::NotLive(_)));

        let outcome = provider.delete_if_up(&spec(), "h1", Some("h2")).await;
        assert!(matches!(outcome, Outcome::NotLive(_)));
        assert!(provider.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_if_up_deletes_confirmed_hash() {
        let provider = FixedProvider::new(&[("h0", "id0"), ("h1", "id1")]);
        let outcome = provider.delete_if_up(&spec(), "H0", Some("h1")).await;
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(*provider.deleted.lock().unwrap(), vec!["id0".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_if_up_empty_read_is_not_live() {
        let provider = FixedProvider::new(&[]);
        let outcome = provider.delete_if_up(&spec(), "h0", None).await;
        assert!(outcome.is_skip());
        assert!(!outcome.is_failure());
    }

    #[test]
    fn test_outcome_from_error() {
        let outcome: Outcome = Error::Internal("no chain.pem".to_string()).into();
        assert_eq!(outcome, Outcome::Internal("no chain.pem".to_string()));
        let outcome: Outcome = Error::Privilege("setuid failed".to_string()).into();
        assert!(outcome.is_failure());
        assert!(outcome.to_string().starts_with("processing-error"));
    }
}
