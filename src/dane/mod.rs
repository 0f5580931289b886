//! Dane directory management
//!
//! Mirrors the certificate authority's `live/` tree as a directory of
//! symlinks that can be pivoted between:
//! - the live symlink (serves whatever the authority issued last)
//! - the archive file behind it (freezes the certificate being served)

mod manager;

pub use manager::{relative_path, DaneDirectory, InitReport, Inventory};
