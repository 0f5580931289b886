use super::tlsa::TlsaSpec;
use crate::error::{DaneResult, Error};
use crate::provider::{DnsProvider, ProviderConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/danectl/config.toml";

/// One day; how long a new hash is published before the old one goes
pub const DEFAULT_TTL_SECS: u64 = 86_400;

const DOMAIN_PATTERN: &str =
    r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$";

fn default_dane_directory() -> PathBuf {
    PathBuf::from("/etc/danectl/dane")
}

fn default_letsencrypt_directory() -> PathBuf {
    PathBuf::from("/etc/letsencrypt")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/danectl/state")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/danectl.lock")
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

// =============================================================================
// Configuration file
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory of symlinks consumers read certificates from
    #[serde(default = "default_dane_directory")]
    pub dane_directory: PathBuf,

    /// Certificate authority configuration directory (holds `live/`)
    #[serde(default = "default_letsencrypt_directory")]
    pub letsencrypt_directory: PathBuf,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Seconds a new hash stays published next to the old one
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    /// Drop a Delete record after this many failed retries (0 = never)
    #[serde(default)]
    pub delete_retry_limit: u32,

    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dane_directory: default_dane_directory(),
            letsencrypt_directory: default_letsencrypt_directory(),
            state_file: default_state_file(),
            lock_file: default_lock_file(),
            ttl: default_ttl(),
            delete_retry_limit: 0,
            targets: Vec::new(),
        }
    }
}

/// A `[[target]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub domain: String,

    /// TLSA specs in `"311 443 tcp"` shorthand
    pub tlsa: Vec<String>,

    pub dns: ProviderConfig,
}

impl Config {
    /// Load and validate the configuration file
    pub fn load(path: &Path) -> DaneResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> DaneResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DaneResult<()> {
        if self.targets.is_empty() {
            return Err(Error::Config("no [[target]] configured".to_string()));
        }
        if self.ttl == 0 {
            return Err(Error::Config("ttl must be positive".to_string()));
        }

        let domain_re = Regex::new(DOMAIN_PATTERN)
            .map_err(|e| Error::Internal(format!("domain pattern: {}", e)))?;
        let mut seen = HashSet::new();

        for target in &self.targets {
            if !domain_re.is_match(&target.domain) {
                return Err(Error::Config(format!("invalid domain '{}'", target.domain)));
            }
            if !seen.insert(target.domain.to_ascii_lowercase()) {
                return Err(Error::Config(format!(
                    "domain '{}' is configured twice",
                    target.domain
                )));
            }
            if target.tlsa.is_empty() {
                return Err(Error::Config(format!(
                    "target '{}' has no tlsa entries",
                    target.domain
                )));
            }
            for spec in &target.tlsa {
                TlsaSpec::parse(spec, &target.domain)?;
            }
        }

        Ok(())
    }

    /// Bind every target to its DNS provider
    pub fn targets(&self) -> DaneResult<Vec<Target>> {
        self.targets.iter().map(Target::from_config).collect()
    }

    pub fn domains(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.domain.as_str()).collect()
    }
}

// =============================================================================
// Runtime target
// =============================================================================

/// A domain, its TLSA specs and the provider publishing them
#[derive(Debug)]
pub struct Target {
    pub domain: String,
    /// Distinct specs in configuration order
    pub tlsa: Vec<TlsaSpec>,
    pub provider: Box<dyn DnsProvider>,
}

impl Target {
    pub fn new(
        domain: impl Into<String>,
        tlsa: Vec<TlsaSpec>,
        provider: Box<dyn DnsProvider>,
    ) -> Self {
        let mut unique: Vec<TlsaSpec> = Vec::with_capacity(tlsa.len());
        for spec in tlsa {
            if !unique.contains(&spec) {
                unique.push(spec);
            }
        }

        Self {
            domain: domain.into(),
            tlsa: unique,
            provider,
        }
    }

    pub fn from_config(config: &TargetConfig) -> DaneResult<Self> {
        let tlsa = config
            .tlsa
            .iter()
            .map(|s| TlsaSpec::parse(s, &config.domain))
            .collect::<DaneResult<Vec<_>>>()?;
        let provider = config.dns.build(&config.domain)?;
        Ok(Self::new(config.domain.clone(), tlsa, provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
dane_directory = "/srv/dane"
ttl = 3600

[[target]]
domain = "example.com"
tlsa = ["311 443 tcp", "311 443 tcp", "201 25 tcp"]

[target.dns]
type = "exec"
command = "/usr/local/bin/tlsa-hook"

[[target]]
domain = "mail.example.org"
tlsa = ["301 25 tcp"]

[target.dns]
type = "cloudflare"
api_token = "secret"
zone = "example.org"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.dane_directory, PathBuf::from("/srv/dane"));
        assert_eq!(config.letsencrypt_directory, PathBuf::from("/etc/letsencrypt"));
        assert_eq!(config.ttl, 3600);
        assert_eq!(config.delete_retry_limit, 0);
        assert_eq!(config.domains(), vec!["example.com", "mail.example.org"]);

        match &config.targets[0].dns {
            ProviderConfig::Exec(exec) => assert_eq!(exec.timeout, 300),
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn test_targets_deduplicate_specs() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let targets = config.targets().unwrap();
        assert_eq!(targets[0].tlsa.len(), 2);
        assert_eq!(targets[0].provider.name(), "exec");
        assert_eq!(targets[1].provider.name(), "cloudflare");
    }

    #[test]
    fn test_validation_errors() {
        let no_targets = "ttl = 10\n";
        assert!(matches!(Config::from_toml(no_targets), Err(Error::Config(_))));

        let bad_domain = SAMPLE.replace("mail.example.org", "bad_domain");
        assert!(Config::from_toml(&bad_domain).is_err());

        let duplicate = SAMPLE.replace("mail.example.org", "example.com");
        assert!(Config::from_toml(&duplicate).is_err());

        let bad_spec = SAMPLE.replace("301 25 tcp", "101 25 tcp");
        assert!(Config::from_toml(&bad_spec).is_err());

        let zero_ttl = SAMPLE.replace("ttl = 3600", "ttl = 0");
        assert!(Config::from_toml(&zero_ttl).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/danectl.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
