//! Orchestrator - the TLSA lifecycle state machine
//!
//! One pass per hook invocation:
//! - pre: pivot renewed domains to their archived certificates
//! - post: publish new hashes, retry what failed before, retire old hashes
//!   once the TTL has passed, and pivot fully drained domains back to live
//!
//! Every per-record failure ends up in the [`RunReport`]; only state store
//! and configuration problems abort the whole run.

use super::report::{Action, RunReport};
use crate::context::Session;
use crate::dane::DaneDirectory;
use crate::error::DaneResult;
use crate::hash::HashProvider;
use crate::models::{
    CertSource, CertTriple, DeleteRecord, Group, PostRecord, PreRecord, Target, Timestamp,
    TlsaSpec,
};
use crate::provider::{short_hash, Outcome};
use crate::state::{StateStore, WriteMode};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

pub struct Orchestrator<'a> {
    session: &'a Session,
    hasher: &'a dyn HashProvider,
    dane: DaneDirectory,
    store: StateStore,
}

impl<'a> Orchestrator<'a> {
    pub fn new(session: &'a Session, hasher: &'a dyn HashProvider) -> DaneResult<Self> {
        Ok(Self {
            dane: session.dane_directory()?,
            store: session.state_store(),
            session,
            hasher,
        })
    }

    /// Pre-hook: keep consumers on the current certificate while the
    /// authority swaps the live one.
    ///
    /// With no renewed domains every configured domain is pivoted.
    pub fn run_pre(&self, renewed: &BTreeSet<String>) -> DaneResult<RunReport> {
        let mut state = self.store.read()?;
        let mut report = RunReport::default();
        self.initialize(&mut report)?;
        warn_unconfigured(self.session, renewed);

        for target in self.session.targets() {
            if !renewed.is_empty() && !is_renewed(renewed, &target.domain) {
                continue;
            }
            let domain = target.domain.as_str();

            match self.dane.pivot_to_archive(domain) {
                Ok(changed) => debug!(domain = %domain, links = changed, "Domain held on archive"),
                Err(e) => {
                    error!(domain = %domain, error = %e, "Failed to pivot to archive");
                    report.record(domain, Action::Pivot, &Outcome::from(e));
                }
            }
            hold_archive(state.group_mut(domain));
        }

        self.store.write(WriteMode::PreHook, &state)?;
        Ok(report)
    }

    /// Post-hook: advance every configured domain's records by one step
    pub async fn run_post(&self, renewed: &BTreeSet<String>) -> DaneResult<RunReport> {
        let mut state = self.store.read()?;
        let mut report = RunReport::default();
        self.initialize(&mut report)?;
        warn_unconfigured(self.session, renewed);

        for domain in state.groups.keys() {
            if self.session.target(domain).is_none() {
                warn!(domain = %domain, "Records for unconfigured domain carried over unchanged");
            }
        }

        for target in self.session.targets() {
            let was_renewed = is_renewed(renewed, &target.domain);
            let group = state.group_mut(&target.domain);
            self.process_group(target, group, was_renewed, &mut report)
                .await;
        }

        self.store.write(WriteMode::PostHook, &state)?;
        Ok(report)
    }

    /// Pivot every configured domain back to live and forget all records
    pub fn reset(&self) -> DaneResult<RunReport> {
        let mut report = RunReport::default();
        for domain in self.session.domains() {
            match self.dane.pivot_to_live(domain) {
                Ok(changed) => {
                    if changed > 0 {
                        report.pivoted_to_live.push(domain.to_string());
                    }
                }
                Err(e) => {
                    error!(domain = %domain, error = %e, "Failed to pivot to live");
                    report.record(domain, Action::Pivot, &Outcome::from(e));
                }
            }
        }
        self.store.clear()?;
        info!(path = %self.store.path().display(), "State cleared");
        Ok(report)
    }

    fn initialize(&self, report: &mut RunReport) -> DaneResult<()> {
        let init = self.dane.initialize(false, &self.session.domains())?;
        for e in init.errors {
            report.record("*", Action::Pivot, &Outcome::from(e));
        }
        Ok(())
    }

    async fn process_group(
        &self,
        target: &Target,
        group: &mut Group,
        renewed: bool,
        report: &mut RunReport,
    ) {
        let domain = target.domain.as_str();
        let triples = match self.dane.triples(domain) {
            Ok(triples) => triples,
            Err(e) => {
                error!(domain = %domain, error = %e, "Cannot inspect certificate files");
                report.record(domain, Action::Hash, &Outcome::from(e));
                return;
            }
        };

        // Delete records created during this pass wait for the next one
        self.retry_deletes(target, group, report).await;

        if renewed {
            info!(domain = %domain, "Domain renewed, publishing new hashes");
            let specs = self.reconcile(target, group, &triples, report);
            self.publish_dane(target, group, &triples, &specs, report)
                .await;
            self.delete_superseded(target, group, report).await;
        } else {
            self.advance_posts(target, group, &triples, report).await;
        }

        self.settle_pivot(domain, group, report);
    }

    /// Compare published hashes against the renewed certificate.
    ///
    /// Returns the target's specs with `needs_action` cleared for every
    /// spec whose published hash is still correct. Published records that
    /// no longer match are marked for deletion; outstanding publish
    /// attempts are superseded by the fresh publish.
    fn reconcile(
        &self,
        target: &Target,
        group: &mut Group,
        triples: &[CertTriple],
        report: &mut RunReport,
    ) -> Vec<TlsaSpec> {
        let domain = target.domain.as_str();
        let mut specs = target.tlsa.clone();

        for post in group.post.iter_mut().filter(|p| p.keep) {
            if post.pending {
                // a timed out publish may still have landed
                warn!(
                    domain = %domain,
                    tlsa = %post.tlsa,
                    hash = %post.hash,
                    "Dropping outstanding publish, remove the record by hand if it reached DNS"
                );
                post.keep = false;
                continue;
            }

            match self.hasher.hash(&post.tlsa, triples, CertSource::Live) {
                Ok(hash) if hash.eq_ignore_ascii_case(&post.hash) => {
                    info!(
                        domain = %domain,
                        tlsa = %post.tlsa,
                        hash = %short_hash(&post.hash),
                        "Published hash still matches, nothing to publish"
                    );
                    suppress(&mut specs, &post.tlsa);
                }
                Ok(hash) => {
                    debug!(
                        domain = %domain,
                        tlsa = %post.tlsa,
                        old = %short_hash(&post.hash),
                        new = %short_hash(&hash),
                        "Published hash superseded by renewal"
                    );
                    post.marked = true;
                    post.keep = false;
                }
                Err(e) => {
                    error!(domain = %domain, tlsa = %post.tlsa, error = %e, "Cannot hash renewed certificate");
                    report.record(domain, Action::Hash, &Outcome::from(e));
                    suppress(&mut specs, &post.tlsa);
                }
            }
        }

        if group.post.iter().any(|p| p.marked) {
            group.set_pre_pending(false);
        }
        specs
    }

    /// Publish the live certificate's hash for every spec that needs it
    async fn publish_dane(
        &self,
        target: &Target,
        group: &mut Group,
        triples: &[CertTriple],
        specs: &[TlsaSpec],
        report: &mut RunReport,
    ) {
        let domain = target.domain.as_str();
        let now = self.session.now();

        for spec in specs.iter().filter(|s| s.needs_action) {
            let hash = match self.hasher.hash(spec, triples, CertSource::Live) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(domain = %domain, tlsa = %spec, error = %e, "Cannot hash certificate");
                    report.record(domain, Action::Hash, &Outcome::from(e));
                    continue;
                }
            };

            let outcome = target.provider.publish(spec, &hash).await;
            log_outcome(domain, spec, "publish", &outcome);
            match &outcome {
                Outcome::Success => {
                    group
                        .post
                        .push(PostRecord::new(spec.clone(), hash, false, now));
                }
                Outcome::AlreadyUp(_) | Outcome::NotLive(_) => {}
                Outcome::Recoverable(_) | Outcome::Processing(_) | Outcome::Internal(_) => {
                    group
                        .post
                        .push(PostRecord::new(spec.clone(), hash, true, now));
                }
            }
            report.record(domain, Action::Publish, &outcome);
        }
    }

    /// Remove hashes the renewal made obsolete; failures become Delete records
    async fn delete_superseded(&self, target: &Target, group: &mut Group, report: &mut RunReport) {
        let domain = target.domain.as_str();
        let now = self.session.now();
        let marked: Vec<PostRecord> = group.post.iter().filter(|p| p.marked).cloned().collect();

        for post in marked {
            let outcome = target
                .provider
                .delete_if_up(&post.tlsa, &post.hash, None)
                .await;
            log_outcome(domain, &post.tlsa, "delete superseded", &outcome);
            if !outcome.is_success() {
                group
                    .delete
                    .push(DeleteRecord::new(post.tlsa, post.hash, None, now));
            }
            report.record(domain, Action::Delete, &outcome);
        }
    }

    /// Retry outstanding publishes and retire old hashes past the TTL
    async fn advance_posts(
        &self,
        target: &Target,
        group: &mut Group,
        triples: &[CertTriple],
        report: &mut RunReport,
    ) {
        let now = self.session.now();
        for post in group.post.iter_mut().filter(|p| p.keep) {
            if post.pending {
                self.retry_publish(target, post, triples, now, report)
                    .await;
            } else {
                self.retire_old_hash(target, post, triples, now, report)
                    .await;
            }
        }
    }

    async fn retry_publish(
        &self,
        target: &Target,
        post: &mut PostRecord,
        triples: &[CertTriple],
        now: Timestamp,
        report: &mut RunReport,
    ) {
        let domain = target.domain.as_str();
        let hash = match self.hasher.hash(&post.tlsa, triples, CertSource::Live) {
            Ok(hash) => hash,
            Err(e) => {
                error!(domain = %domain, tlsa = %post.tlsa, error = %e, "Cannot hash certificate");
                report.record(domain, Action::Hash, &Outcome::from(e));
                return;
            }
        };

        let outcome = target.provider.publish(&post.tlsa, &hash).await;
        log_outcome(domain, &post.tlsa, "publish retry", &outcome);
        match &outcome {
            // the record is up either way; start the TTL from here
            Outcome::Success | Outcome::AlreadyUp(_) => {
                post.pending = false;
                post.published_at = now;
                post.hash = hash;
            }
            Outcome::NotLive(_)
            | Outcome::Recoverable(_)
            | Outcome::Processing(_)
            | Outcome::Internal(_) => {}
        }
        report.record(domain, Action::Publish, &outcome);
    }

    /// TTL gate: once `ttl` seconds have passed since the new hash went up,
    /// delete the hash of the certificate the dane symlinks still serve
    async fn retire_old_hash(
        &self,
        target: &Target,
        post: &mut PostRecord,
        triples: &[CertTriple],
        now: Timestamp,
        report: &mut RunReport,
    ) {
        let domain = target.domain.as_str();
        let ttl = i64::try_from(self.session.config().ttl).unwrap_or(i64::MAX);
        let elapsed = now.saturating_sub(post.published_at);
        if elapsed < ttl {
            debug!(
                domain = %domain,
                tlsa = %post.tlsa,
                remaining = ttl - elapsed,
                "Waiting for TTL before deleting previous hash"
            );
            return;
        }

        let old = match self.hasher.hash(&post.tlsa, triples, CertSource::Dane) {
            Ok(hash) => hash,
            Err(e) => {
                error!(domain = %domain, tlsa = %post.tlsa, error = %e, "Cannot hash archived certificate");
                report.record(domain, Action::Hash, &Outcome::from(e));
                return;
            }
        };

        if old.eq_ignore_ascii_case(&post.hash) {
            info!(domain = %domain, tlsa = %post.tlsa, "No previous hash to delete");
            post.keep = false;
            return;
        }

        let outcome = target
            .provider
            .delete_if_up(&post.tlsa, &old, Some(&post.hash))
            .await;
        log_outcome(domain, &post.tlsa, "delete previous", &outcome);
        if outcome.is_success() {
            post.keep = false;
        }
        report.record(domain, Action::Delete, &outcome);
    }

    async fn retry_deletes(&self, target: &Target, group: &mut Group, report: &mut RunReport) {
        let domain = target.domain.as_str();
        let limit = self.session.config().delete_retry_limit;

        for del in group.delete.iter_mut().filter(|d| d.keep) {
            let outcome = target
                .provider
                .delete_if_up(&del.tlsa, &del.hash1, del.hash2.as_deref())
                .await;
            log_outcome(domain, &del.tlsa, "delete retry", &outcome);

            if outcome.is_success() {
                del.keep = false;
                report.record(domain, Action::Delete, &outcome);
                continue;
            }

            del.retries = del.retries.saturating_add(1);
            if limit > 0 && del.retries >= limit {
                error!(
                    domain = %domain,
                    tlsa = %del.tlsa,
                    hash = %short_hash(&del.hash1),
                    retries = del.retries,
                    "Giving up on deleting TLSA record, remove it by hand"
                );
                del.keep = false;
                report.record(
                    domain,
                    Action::Delete,
                    &Outcome::Processing(format!(
                        "gave up deleting {} for {} after {} retries",
                        short_hash(&del.hash1),
                        del.tlsa,
                        del.retries
                    )),
                );
                continue;
            }
            report.record(domain, Action::Delete, &outcome);
        }
    }

    /// Symlinks stay on the archive while any Post or Delete record is kept;
    /// a drained domain goes back to live.
    fn settle_pivot(&self, domain: &str, group: &mut Group, report: &mut RunReport) {
        if group.holds_archive() {
            hold_archive(group);
            return;
        }

        match self.dane.pivot_to_live(domain) {
            Ok(changed) => {
                if changed > 0 {
                    report.pivoted_to_live.push(domain.to_string());
                }
                for pre in &mut group.pre {
                    pre.keep = false;
                }
            }
            Err(e) => {
                error!(domain = %domain, error = %e, "Failed to pivot to live");
                report.record(domain, Action::Pivot, &Outcome::from(e));
                hold_archive(group);
            }
        }
    }
}

/// Make sure a pending Pre record keeps the domain on the archive
fn hold_archive(group: &mut Group) {
    if group.pre.iter().any(|p| p.keep) {
        group.set_pre_pending(true);
    } else {
        let domain = group.domain.clone();
        group.pre.push(PreRecord::new(domain));
    }
}

fn suppress(specs: &mut [TlsaSpec], tlsa: &TlsaSpec) {
    for spec in specs.iter_mut().filter(|s| **s == *tlsa) {
        spec.needs_action = false;
    }
}

fn is_renewed(renewed: &BTreeSet<String>, domain: &str) -> bool {
    renewed.contains(&domain.to_ascii_lowercase())
}

fn warn_unconfigured(session: &Session, renewed: &BTreeSet<String>) {
    for domain in renewed {
        if session.target(domain).is_none() {
            warn!(domain = %domain, "Renewed domain is not configured, ignoring");
        }
    }
}

fn log_outcome(domain: &str, spec: &TlsaSpec, step: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Success => info!(domain = %domain, tlsa = %spec, "TLSA {} succeeded", step),
        Outcome::AlreadyUp(msg) | Outcome::NotLive(msg) => {
            info!(domain = %domain, tlsa = %spec, outcome = outcome.label(), "{}: {}", step, msg)
        }
        Outcome::Recoverable(msg) => {
            warn!(domain = %domain, tlsa = %spec, "{} failed, will retry: {}", step, msg)
        }
        Outcome::Processing(msg) | Outcome::Internal(msg) => {
            error!(domain = %domain, tlsa = %spec, outcome = outcome.label(), "{} failed: {}", step, msg)
        }
    }
}
