//! State file management
//!
//! Persists the lifecycle records that carry a domain from one hook
//! invocation to the next:
//! - Pre records (symlinks held on the archive)
//! - Post records (hash publishing / waiting out the TTL)
//! - Delete records (deletions to retry)

mod store;

pub use store::{format_record, parse_record, StateStore, WriteMode};
