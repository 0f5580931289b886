pub mod config;
pub mod record;
pub mod tlsa;

pub use config::{Config, Target, TargetConfig};
pub use record::{
    DeleteRecord, Group, LifecycleRecord, LifecycleState, PostRecord, PreRecord, Timestamp,
    NEW_ORDINAL,
};
pub use tlsa::{CertSource, CertTriple, TlsaSpec};
