//! Cloudflare DNS provider
//!
//! Manages TLSA records through the Cloudflare v4 API:
//! <https://developers.cloudflare.com/api/resources/dns/subresources/records/>

use super::{short_hash, DnsProvider, LiveRecords, Outcome};
use crate::error::{DaneResult, Error};
use crate::models::TlsaSpec;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare error codes meaning the identical record exists already
const RECORD_EXISTS_CODES: &[u64] = &[81057, 81058];

fn default_api_base() -> String {
    CLOUDFLARE_API_BASE.to_string()
}

fn default_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudflareConfig {
    /// API token with DNS edit permission
    #[serde(default)]
    pub api_token: Option<String>,

    /// File holding the API token (preferred over inline tokens)
    #[serde(default)]
    pub api_token_file: Option<PathBuf>,

    /// Zone name; looked up by walking the domain's labels when absent
    #[serde(default)]
    pub zone: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug)]
pub struct CloudflareProvider {
    client: Client,
    api_base: String,
    token: String,
    zone_candidates: Vec<String>,
    zone_id: Mutex<Option<String>>,
}

impl CloudflareProvider {
    pub fn new(config: &CloudflareConfig, domain: &str) -> DaneResult<Self> {
        let token = load_token(config)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let zone_candidates = match &config.zone {
            Some(zone) => vec![zone.trim_end_matches('.').to_string()],
            None => zone_candidates(domain),
        };

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            zone_candidates,
            zone_id: Mutex::new(None),
        })
    }

    /// Send a request and unwrap Cloudflare's `{success, errors, result}` envelope
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Outcome> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Outcome::Recoverable(format!("Cloudflare request timed out: {}", e))
                } else {
                    Outcome::Recoverable(format!("Cloudflare request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Outcome::Recoverable(format!("failed to read Cloudflare response: {}", e))
        })?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Outcome::Recoverable(format!(
                "Cloudflare returned HTTP {} - {}",
                status, body
            )));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            Outcome::Processing(format!(
                "failed to parse Cloudflare response (HTTP {}): {}",
                status, e
            ))
        })?;

        if !envelope.success || !status.is_success() {
            return Err(envelope.failure(status));
        }

        envelope
            .result
            .ok_or_else(|| Outcome::Processing("Cloudflare response has no result".to_string()))
    }

    async fn zone_id(&self) -> Result<String, Outcome> {
        if let Some(id) = self.cached_zone_id() {
            return Ok(id);
        }

        for name in &self.zone_candidates {
            let request = self
                .client
                .get(format!("{}/zones", self.api_base))
                .query(&[("name", name.as_str())]);
            let zones: Vec<Zone> = self.send(request).await?;

            if let Some(zone) = zones.into_iter().find(|z| z.name.eq_ignore_ascii_case(name)) {
                debug!(zone = %zone.name, zone_id = %zone.id, "Found Cloudflare zone");
                if let Ok(mut cached) = self.zone_id.lock() {
                    *cached = Some(zone.id.clone());
                }
                return Ok(zone.id);
            }
        }

        Err(Outcome::Processing(format!(
            "no Cloudflare zone found (tried {})",
            self.zone_candidates.join(", ")
        )))
    }

    fn cached_zone_id(&self) -> Option<String> {
        self.zone_id.lock().ok().and_then(|z| z.clone())
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    async fn publish(&self, spec: &TlsaSpec, hash: &str) -> Outcome {
        let zone_id = match self.zone_id().await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        debug!(tlsa = %spec, hash = %short_hash(hash), "Creating TLSA record via Cloudflare");

        let body = NewRecord {
            record_type: "TLSA",
            name: spec.owner_name(),
            data: TlsaData {
                usage: spec.usage,
                selector: spec.selector,
                matching_type: spec.matching,
                certificate: hash.to_ascii_lowercase(),
            },
            ttl: 1,
        };
        let request = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .json(&body);

        match self.send::<Record>(request).await {
            Ok(record) => {
                debug!(record_id = %record.id, "TLSA record created");
                Outcome::Success
            }
            Err(outcome) => outcome,
        }
    }

    async fn read(&self, spec: &TlsaSpec) -> Result<LiveRecords, Outcome> {
        let zone_id = self.zone_id().await?;
        let request = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .query(&[("type", "TLSA"), ("name", spec.owner_name().as_str())]);
        let records: Vec<Record> = self.send(request).await?;

        let live = live_records(spec, records);
        if live.is_empty() {
            return Err(Outcome::NotLive(format!(
                "no TLSA records published for {}",
                spec.owner_name()
            )));
        }
        Ok(live)
    }

    async fn delete(&self, spec: &TlsaSpec, record_id: &str) -> Outcome {
        let zone_id = match self.zone_id().await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        debug!(tlsa = %spec, record_id = %record_id, "Deleting TLSA record via Cloudflare");

        let request = self.client.delete(format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, zone_id, record_id
        ));
        match self.send::<DeletedRecord>(request).await {
            Ok(_) => Outcome::Success,
            Err(outcome) => outcome,
        }
    }
}

/// Published hashes of the records carrying `spec`'s parameters
fn live_records(spec: &TlsaSpec, records: Vec<Record>) -> LiveRecords {
    records
        .into_iter()
        .filter_map(|r| {
            let data = r.data?;
            (data.usage == spec.usage
                && data.selector == spec.selector
                && data.matching_type == spec.matching)
                .then(|| (data.certificate.to_ascii_lowercase(), r.id))
        })
        .collect()
}

/// Zone names to try for `domain`, most specific first, never a bare TLD
fn zone_candidates(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();
    (0..labels.len().saturating_sub(1))
        .map(|i| labels[i..].join("."))
        .collect()
}

fn load_token(config: &CloudflareConfig) -> DaneResult<String> {
    if let Some(path) = &config.api_token_file {
        let metadata = std::fs::metadata(path).map_err(|e| {
            Error::Config(format!("failed to read token file {:?}: {}", path, e))
        })?;
        if metadata.permissions().mode() & 0o077 != 0 {
            warn!(path = %path.display(), "Cloudflare token file is readable by group or others");
        }
        let token = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read token file {:?}: {}", path, e))
        })?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(Error::Config(format!("token file {:?} is empty", path)));
        }
        return Ok(token);
    }

    match &config.api_token {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(Error::Config(
            "cloudflare provider requires 'api_token' or 'api_token_file'".to_string(),
        )),
    }
}

// Cloudflare API types

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn failure(&self, status: StatusCode) -> Outcome {
        if self
            .errors
            .iter()
            .any(|e| RECORD_EXISTS_CODES.contains(&e.code))
        {
            return Outcome::AlreadyUp("Cloudflare reports the record already exists".to_string());
        }

        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect();
        Outcome::Processing(format!(
            "Cloudflare returned HTTP {}: {}",
            status,
            messages.join("; ")
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: u64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(default)]
    data: Option<TlsaData>,
}

#[derive(Debug, Deserialize)]
struct DeletedRecord {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TlsaData {
    usage: u8,
    selector: u8,
    matching_type: u8,
    certificate: String,
}

#[derive(Debug, Serialize)]
struct NewRecord {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: String,
    data: TlsaData,
    ttl: u32,
}
