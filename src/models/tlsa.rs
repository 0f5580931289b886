use crate::error::{DaneResult, Error};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Protocols a TLSA owner name may carry
pub const PROTOCOLS: &[&str] = &["tcp", "udp", "sctp"];

/// TLSA record parameters for one service of a domain.
///
/// Identity is the parameter tuple `(usage, selector, matching, port,
/// protocol, domain)`. `needs_action` is scratch state for a single
/// orchestration pass and takes no part in equality or ordering.
#[derive(Debug, Clone)]
pub struct TlsaSpec {
    pub usage: u8,
    pub selector: u8,
    pub matching: u8,
    pub port: u16,
    pub protocol: String,
    pub domain: String,
    pub needs_action: bool,
}

impl TlsaSpec {
    pub fn new(
        usage: u8,
        selector: u8,
        matching: u8,
        port: u16,
        protocol: impl Into<String>,
        domain: impl Into<String>,
    ) -> DaneResult<Self> {
        let protocol = protocol.into().to_ascii_lowercase();
        let domain = domain.into();

        if !matches!(usage, 2 | 3) {
            return Err(Error::Config(format!(
                "TLSA usage {} is not supported (expected 2 or 3)",
                usage
            )));
        }
        if selector > 1 {
            return Err(Error::Config(format!(
                "TLSA selector {} is invalid (expected 0 or 1)",
                selector
            )));
        }
        if matching > 2 {
            return Err(Error::Config(format!(
                "TLSA matching type {} is invalid (expected 0, 1 or 2)",
                matching
            )));
        }
        if port == 0 {
            return Err(Error::Config("TLSA port must be in 1-65535".to_string()));
        }
        if !PROTOCOLS.contains(&protocol.as_str()) {
            return Err(Error::Config(format!(
                "TLSA protocol '{}' is invalid (expected one of {})",
                protocol,
                PROTOCOLS.join(", ")
            )));
        }

        Ok(Self {
            usage,
            selector,
            matching,
            port,
            protocol,
            domain,
            needs_action: true,
        })
    }

    /// Parse the configuration shorthand `"311 443 tcp"`.
    ///
    /// The first token packs usage, selector and matching type as three
    /// digits; the port and protocol follow.
    pub fn parse(input: &str, domain: &str) -> DaneResult<Self> {
        let fields: Vec<&str> = input.split_whitespace().collect();
        let [params, port, protocol] = fields.as_slice() else {
            return Err(Error::Config(format!(
                "TLSA spec '{}' must look like '311 443 tcp'",
                input
            )));
        };

        let digits: Vec<u8> = params
            .chars()
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<Vec<u8>>>()
            .filter(|d| d.len() == 3)
            .ok_or_else(|| {
                Error::Config(format!(
                    "TLSA parameters '{}' must be three digits (usage, selector, matching)",
                    params
                ))
            })?;

        let port: u16 = port
            .parse()
            .map_err(|_| Error::Config(format!("TLSA port '{}' is not a number", port)))?;

        Self::new(digits[0], digits[1], digits[2], port, *protocol, domain)
    }

    /// DNS owner name of the record, e.g. `_443._tcp.example.com`
    pub fn owner_name(&self) -> String {
        format!("_{}._{}.{}", self.port, self.protocol, self.domain)
    }

    /// Parameter tuple used for identity and de-duplication
    pub fn params(&self) -> (u8, u8, u8, u16, &str, &str) {
        (
            self.usage,
            self.selector,
            self.matching,
            self.port,
            &self.protocol,
            &self.domain,
        )
    }

    /// Zone-file line for this record carrying `hash`
    pub fn record_line(&self, hash: &str) -> String {
        format!(
            "{}. IN TLSA {} {} {} {}",
            self.owner_name(),
            self.usage,
            self.selector,
            self.matching,
            hash
        )
    }
}

impl PartialEq for TlsaSpec {
    fn eq(&self, other: &Self) -> bool {
        self.params() == other.params()
    }
}

impl Eq for TlsaSpec {}

impl Hash for TlsaSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.params().hash(state);
    }
}

impl PartialOrd for TlsaSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TlsaSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.params().cmp(&other.params())
    }
}

impl fmt::Display for TlsaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{} {}",
            self.usage,
            self.selector,
            self.matching,
            self.owner_name()
        )
    }
}

/// The three paths behind one certificate file of a domain.
///
/// Consumers only ever read `dane`; the pivot manager swings it between
/// `live` (the authority's symlink) and `archive` (the file `live` resolved
/// to when the triple was taken).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertTriple {
    pub dane: PathBuf,
    pub live: PathBuf,
    pub archive: PathBuf,
}

impl CertTriple {
    /// File name shared by the dane and live paths (e.g. `cert.pem`)
    pub fn file_name(&self) -> Option<&str> {
        self.dane.file_name().and_then(|n| n.to_str())
    }

    pub fn path(&self, source: CertSource) -> &Path {
        match source {
            CertSource::Live => &self.live,
            CertSource::Dane => &self.dane,
        }
    }
}

/// Which side of a [`CertTriple`] certificate material is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertSource {
    /// The certificate the authority just issued
    Live,
    /// Whatever the dane symlink serves right now (archive while pivoted)
    Dane,
}
