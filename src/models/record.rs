//! Lifecycle records persisted between hook invocations

use super::tlsa::TlsaSpec;
use std::collections::BTreeMap;

/// Seconds since the Unix epoch
pub type Timestamp = i64;

/// Ordinal given to records created during the current run.
///
/// The store sorts by ordinal before writing, so new records land after
/// every record that was read from disk, in creation order.
pub const NEW_ORDINAL: usize = usize::MAX;

/// Domain whose dane symlinks must stay pivoted to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreRecord {
    pub domain: String,
    pub ordinal: usize,
    pub pending: bool,
    pub keep: bool,
}

impl PreRecord {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ordinal: NEW_ORDINAL,
            pending: true,
            keep: true,
        }
    }
}

/// A hash we published (or are trying to publish) for one TLSA spec.
///
/// `pending == true`: the publish attempt is outstanding and will be
/// retried. `pending == false`: the hash is published and the record is
/// waiting out the TTL before the previous hash may be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub domain: String,
    pub ordinal: usize,
    pub tlsa: TlsaSpec,
    pub pending: bool,
    pub published_at: Timestamp,
    pub hash: String,
    pub marked: bool,
    pub keep: bool,
}

impl PostRecord {
    pub fn new(tlsa: TlsaSpec, hash: impl Into<String>, pending: bool, now: Timestamp) -> Self {
        Self {
            domain: tlsa.domain.clone(),
            ordinal: NEW_ORDINAL,
            tlsa,
            pending,
            published_at: now,
            hash: hash.into(),
            marked: false,
            keep: true,
        }
    }
}

/// A deletion that was attempted and has to be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecord {
    pub domain: String,
    pub ordinal: usize,
    pub tlsa: TlsaSpec,
    pub retries: u32,
    pub recorded_at: Timestamp,
    pub hash1: String,
    pub hash2: Option<String>,
    pub keep: bool,
}

impl DeleteRecord {
    pub fn new(
        tlsa: TlsaSpec,
        hash1: impl Into<String>,
        hash2: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            domain: tlsa.domain.clone(),
            ordinal: NEW_ORDINAL,
            tlsa,
            retries: 0,
            recorded_at: now,
            hash1: hash1.into(),
            hash2,
            keep: true,
        }
    }
}

/// One line of the state file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleRecord {
    Pre(PreRecord),
    Post(PostRecord),
    Delete(DeleteRecord),
}

impl LifecycleRecord {
    pub fn domain(&self) -> &str {
        match self {
            LifecycleRecord::Pre(r) => &r.domain,
            LifecycleRecord::Post(r) => &r.domain,
            LifecycleRecord::Delete(r) => &r.domain,
        }
    }

    pub fn ordinal(&self) -> usize {
        match self {
            LifecycleRecord::Pre(r) => r.ordinal,
            LifecycleRecord::Post(r) => r.ordinal,
            LifecycleRecord::Delete(r) => r.ordinal,
        }
    }

    pub fn keep(&self) -> bool {
        match self {
            LifecycleRecord::Pre(r) => r.keep,
            LifecycleRecord::Post(r) => r.keep,
            LifecycleRecord::Delete(r) => r.keep,
        }
    }

    /// Kind tag as written to the state file
    pub fn tag(&self) -> &'static str {
        match self {
            LifecycleRecord::Pre(_) => "PRE",
            LifecycleRecord::Post(_) => "POST",
            LifecycleRecord::Delete(_) => "DEL",
        }
    }
}

/// All records of one domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub domain: String,
    pub pre: Vec<PreRecord>,
    pub post: Vec<PostRecord>,
    pub delete: Vec<DeleteRecord>,
}

impl Group {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: LifecycleRecord) {
        match record {
            LifecycleRecord::Pre(r) => self.pre.push(r),
            LifecycleRecord::Post(r) => self.post.push(r),
            LifecycleRecord::Delete(r) => self.delete.push(r),
        }
    }

    /// True while any Post or Delete record will be persisted.
    ///
    /// The domain's dane symlinks have to stay on the archive until this
    /// turns false.
    pub fn holds_archive(&self) -> bool {
        self.post.iter().any(|r| r.keep) || self.delete.iter().any(|r| r.keep)
    }

    pub fn is_empty(&self) -> bool {
        !self.pre.iter().any(|r| r.keep) && !self.holds_archive()
    }

    /// Records of this group, in no particular order
    pub fn records(&self) -> impl Iterator<Item = LifecycleRecord> + '_ {
        self.pre
            .iter()
            .cloned()
            .map(LifecycleRecord::Pre)
            .chain(self.post.iter().cloned().map(LifecycleRecord::Post))
            .chain(self.delete.iter().cloned().map(LifecycleRecord::Delete))
    }

    pub fn set_pre_pending(&mut self, pending: bool) {
        for pre in &mut self.pre {
            pre.pending = pending;
        }
    }
}

/// Every group read from (or about to be written to) the state file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleState {
    pub groups: BTreeMap<String, Group>,
}

impl LifecycleState {
    pub fn group(&self, domain: &str) -> Option<&Group> {
        self.groups.get(domain)
    }

    /// Get the group for `domain`, creating an empty one if needed
    pub fn group_mut(&mut self, domain: &str) -> &mut Group {
        self.groups
            .entry(domain.to_string())
            .or_insert_with(|| Group::new(domain))
    }

    pub fn push(&mut self, record: LifecycleRecord) {
        let domain = record.domain().to_string();
        self.group_mut(&domain).push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Group::is_empty)
    }
}
