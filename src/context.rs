//! Per-invocation session
//!
//! Bundles what every orchestration step needs: the loaded configuration,
//! the targets bound to their providers, a clock and (for mutating
//! commands) the process lock.

use crate::dane::DaneDirectory;
use crate::error::DaneResult;
use crate::lock::ProcessLock;
use crate::models::{Config, Target, Timestamp};
use crate::state::StateStore;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of "now" for TTL decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to; clones share the same time
#[derive(Debug, Clone)]
pub struct FixedClock(Arc<AtomicI64>);

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self(Arc::new(AtomicI64::new(now)))
    }

    pub fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    targets: Vec<Target>,
    clock: Box<dyn Clock>,
    lock: Option<ProcessLock>,
}

impl Session {
    pub fn new(config: Config, targets: Vec<Target>) -> Self {
        Self {
            config,
            targets,
            clock: Box::new(SystemClock),
            lock: None,
        }
    }

    /// Bind every configured target to its provider
    pub fn from_config(config: Config) -> DaneResult<Self> {
        let targets = config.targets()?;
        Ok(Self::new(config, targets))
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Take the process lock; fails with `LockBusy` if another invocation
    /// holds it
    pub fn lock(mut self) -> DaneResult<Self> {
        if self.lock.is_none() {
            self.lock = Some(ProcessLock::acquire(&self.config.lock_file)?);
        }
        Ok(self)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, domain: &str) -> Option<&Target> {
        self.targets
            .iter()
            .find(|t| t.domain.eq_ignore_ascii_case(domain))
    }

    pub fn domains(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.domain.as_str()).collect()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.config.state_file)
    }

    pub fn dane_directory(&self) -> DaneResult<DaneDirectory> {
        DaneDirectory::new(
            &self.config.dane_directory,
            &self.config.letsencrypt_directory,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fixed_clock_is_shared() {
        let clock = FixedClock::new(1_000);
        let session = Session::new(Config::default(), Vec::new()).with_clock(clock.clone());
        assert_eq!(session.now(), 1_000);

        clock.advance(86_400);
        assert_eq!(session.now(), 87_400);
        clock.set(5);
        assert_eq!(session.now(), 5);
    }

    #[test]
    fn test_session_lock() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            lock_file: temp.path().join("danectl.lock"),
            ..Config::default()
        };

        let first = Session::new(config.clone(), Vec::new()).lock().unwrap();
        assert!(first.is_locked());
        assert!(Session::new(config, Vec::new()).lock().is_err());
    }
}
