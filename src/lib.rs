// danectl - DANE TLSA lifecycle for rotating certificates
// Publishes the new certificate's TLSA record, waits out the TTL, then retires the old one

pub mod cli;
pub mod context;
pub mod dane;
pub mod error;
pub mod hash;
pub mod lock;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod state;

pub use anyhow::{Context, Result};
pub use colored::Colorize;

// Re-export commonly used types
pub use context::{Clock, FixedClock, Session, SystemClock};
pub use error::{DaneResult, Error};
pub use models::{Config, Target, TlsaSpec};
pub use orchestrator::{Orchestrator, RunReport};
pub use provider::{DnsProvider, Outcome};
