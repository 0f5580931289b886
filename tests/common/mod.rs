#![allow(dead_code)]

use async_trait::async_trait;
use danectl::hash::HashProvider;
use danectl::models::{CertSource, CertTriple, Config, Target, TlsaSpec};
use danectl::provider::LiveRecords;
use danectl::{DaneResult, DnsProvider, Error, FixedClock, Outcome, Session};
use std::collections::{BTreeMap, VecDeque};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const DOMAIN: &str = "example.com";
pub const T0: i64 = 1_700_000_000;
pub const TTL: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Publish(String),
    Read,
    Delete(String),
}

#[derive(Debug, Default)]
struct MockState {
    live: BTreeMap<String, String>,
    calls: Vec<Call>,
    publish_results: VecDeque<Outcome>,
    delete_results: VecDeque<Outcome>,
    last_read: Option<BTreeMap<String, String>>,
    unsafe_deletes: usize,
    next_id: usize,
}

/// In-memory DNS zone recording every call it receives.
///
/// `delete` checks that the id it is asked to remove was in the result of
/// the read that came right before it.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `hash` in the zone as if it had been published earlier
    pub fn seed(&self, hash: &str) {
        let mut state = self.state.lock().unwrap();
        let id = format!("id-{}", hash);
        state.live.insert(hash.to_string(), id);
    }

    pub fn remove(&self, hash: &str) {
        self.state.lock().unwrap().live.remove(hash);
    }

    pub fn live_hashes(&self) -> Vec<String> {
        self.state.lock().unwrap().live.keys().cloned().collect()
    }

    /// Next publish answers with `outcome` (once)
    pub fn fail_publish(&self, outcome: Outcome) {
        self.state.lock().unwrap().publish_results.push_back(outcome);
    }

    pub fn fail_delete(&self, outcome: Outcome) {
        self.state.lock().unwrap().delete_results.push_back(outcome);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn publishes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Publish(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn unsafe_deletes(&self) -> usize {
        self.state.lock().unwrap().unsafe_deletes
    }
}

#[async_trait]
impl DnsProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn publish(&self, _spec: &TlsaSpec, hash: &str) -> Outcome {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Publish(hash.to_string()));
        if let Some(outcome) = state.publish_results.pop_front() {
            return outcome;
        }
        if state.live.contains_key(hash) {
            return Outcome::AlreadyUp(format!("{} exists", hash));
        }
        state.next_id += 1;
        let id = format!("id-{}", hash);
        state.live.insert(hash.to_string(), id);
        Outcome::Success
    }

    async fn read(&self, _spec: &TlsaSpec) -> Result<LiveRecords, Outcome> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        let live = state.live.clone();
        state.last_read = Some(live.clone());
        if live.is_empty() {
            return Err(Outcome::NotLive("zone is empty".to_string()));
        }
        Ok(live)
    }

    async fn delete(&self, _spec: &TlsaSpec, record_id: &str) -> Outcome {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(record_id.to_string()));

        let confirmed = matches!(state.calls.iter().rev().nth(1), Some(Call::Read))
            && state
                .last_read
                .as_ref()
                .is_some_and(|read| read.values().any(|id| id == record_id));
        if !confirmed {
            state.unsafe_deletes += 1;
        }

        if let Some(outcome) = state.delete_results.pop_front() {
            return outcome;
        }
        state.live.retain(|_, id| id != record_id);
        Outcome::Success
    }
}

/// Uses the content of `cert.pem` as the hash, so tests pick hashes by
/// writing files
#[derive(Debug, Default)]
pub struct ContentHasher;

impl HashProvider for ContentHasher {
    fn hash(&self, _spec: &TlsaSpec, certs: &[CertTriple], source: CertSource) -> DaneResult<String> {
        let cert = certs
            .iter()
            .find(|c| c.file_name() == Some("cert.pem"))
            .ok_or_else(|| Error::Internal("no cert.pem".to_string()))?;
        let content = std::fs::read_to_string(cert.path(source))
            .map_err(|e| Error::Internal(format!("{:?}: {}", cert.path(source), e)))?;
        Ok(content.trim().to_string())
    }
}

pub struct Fixture {
    pub temp: TempDir,
    pub clock: FixedClock,
    pub provider: MockProvider,
    pub config: Config,
}

impl Fixture {
    /// letsencrypt tree whose current certificate hashes to `hash`
    pub fn new(hash: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let le = temp.path().join("letsencrypt");
        std::fs::create_dir_all(le.join("archive").join(DOMAIN)).unwrap();
        std::fs::create_dir_all(le.join("live").join(DOMAIN)).unwrap();

        let config = Config {
            dane_directory: temp.path().join("dane"),
            letsencrypt_directory: le,
            state_file: temp.path().join("state/danectl.state"),
            lock_file: temp.path().join("danectl.lock"),
            ttl: TTL,
            ..Config::default()
        };

        let fixture = Self {
            temp,
            clock: FixedClock::new(T0),
            provider: MockProvider::new(),
            config,
        };
        fixture.renew(1, hash);
        fixture
    }

    pub fn letsencrypt(&self) -> &Path {
        &self.config.letsencrypt_directory
    }

    /// Issue certificate number `serial` with `hash` and point live at it
    pub fn renew(&self, serial: u32, hash: &str) {
        let archive = self.letsencrypt().join("archive").join(DOMAIN);
        let live = self.letsencrypt().join("live").join(DOMAIN);
        for name in ["cert", "chain", "fullchain", "privkey"] {
            let file = format!("{}{}.pem", name, serial);
            std::fs::write(archive.join(&file), format!("{}\n", hash)).unwrap();
            let link = live.join(format!("{}.pem", name));
            let _ = std::fs::remove_file(&link);
            symlink(format!("../../archive/{}/{}", DOMAIN, file), &link).unwrap();
        }
    }

    pub fn session(&self) -> Session {
        let spec = TlsaSpec::parse("311 443 tcp", DOMAIN).unwrap();
        let target = Target::new(DOMAIN, vec![spec], Box::new(self.provider.clone()));
        Session::new(self.config.clone(), vec![target]).with_clock(self.clock.clone())
    }

    pub fn state(&self) -> String {
        std::fs::read_to_string(&self.config.state_file).unwrap_or_default()
    }

    pub fn write_state(&self, content: &str) {
        std::fs::create_dir_all(self.config.state_file.parent().unwrap()).unwrap();
        std::fs::write(&self.config.state_file, content).unwrap();
    }

    /// What consumers reading the dane cert.pem get right now
    pub fn served(&self) -> String {
        std::fs::read_to_string(self.dane_cert()).unwrap().trim().to_string()
    }

    pub fn dane_cert(&self) -> PathBuf {
        self.config.dane_directory.join(DOMAIN).join("cert.pem")
    }

    pub fn is_pivoted(&self) -> bool {
        let target = std::fs::read_link(self.dane_cert()).unwrap();
        target.is_relative()
    }
}
