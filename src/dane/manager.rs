//! DaneDirectory - symlink mirror of the live certificate tree

use crate::error::{DaneResult, Error};
use crate::models::CertTriple;
use std::collections::BTreeMap;
use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Mode of the dane root directory
const ROOT_MODE: u32 = 0o700;

/// Certificate triples per domain
pub type Inventory = BTreeMap<String, Vec<CertTriple>>;

/// Result of [`DaneDirectory::initialize`]
#[derive(Debug, Default)]
pub struct InitReport {
    pub inventory: Inventory,
    /// Per-domain failures; the other domains were still processed
    pub errors: Vec<Error>,
}

/// The dane directory and the authority's `live/` directory it mirrors
#[derive(Debug, Clone)]
pub struct DaneDirectory {
    root: PathBuf,
    live: PathBuf,
}

impl DaneDirectory {
    /// `letsencrypt_dir` is the authority's configuration directory; its
    /// `live/` subdirectory is mirrored.
    pub fn new(root: impl AsRef<Path>, letsencrypt_dir: impl AsRef<Path>) -> DaneResult<Self> {
        Ok(Self {
            root: normalize(&std::path::absolute(root.as_ref())?),
            live: normalize(&std::path::absolute(letsencrypt_dir.as_ref())?.join("live")),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn live_dir(&self) -> &Path {
        &self.live
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain)
    }

    /// Make sure the dane tree exists and mirrors `live/`.
    ///
    /// Existing symlinks are left alone unless `force`, in which case the
    /// root's owner and mode are reasserted and every dane symlink is
    /// recreated pointing at its live symlink. Every domain in `required`
    /// must have a live directory.
    pub fn initialize(&self, force: bool, required: &[&str]) -> DaneResult<InitReport> {
        self.ensure_root(force)?;

        let mut report = InitReport::default();
        let mut failed = Vec::new();

        for entry in WalkDir::new(&self.live)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::dane(&self.live, e.to_string()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(domain) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "Skipping non UTF-8 live directory");
                continue;
            };

            match self.init_domain(&domain, force) {
                Ok(triples) => {
                    report.inventory.insert(domain, triples);
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Failed to mirror live directory");
                    failed.push(domain);
                    report.errors.push(e);
                }
            }
        }

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|d| !report.inventory.contains_key(*d) && !failed.iter().any(|f| f == d))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "no live certificate directory in {:?} for: {}",
                self.live,
                missing.join(", ")
            )));
        }

        Ok(report)
    }

    fn ensure_root(&self, force: bool) -> DaneResult<()> {
        match std::fs::symlink_metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {
                if force {
                    std::fs::set_permissions(
                        &self.root,
                        std::fs::Permissions::from_mode(ROOT_MODE),
                    )?;
                    std::os::unix::fs::chown(
                        &self.root,
                        Some(nix::unistd::geteuid().as_raw()),
                        Some(nix::unistd::getegid().as_raw()),
                    )?;
                }
                Ok(())
            }
            Ok(_) => Err(Error::dane(&self.root, "exists but is not a directory")),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.root.display(), "Creating dane directory");
                DirBuilder::new()
                    .recursive(true)
                    .mode(ROOT_MODE)
                    .create(&self.root)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn init_domain(&self, domain: &str, force: bool) -> DaneResult<Vec<CertTriple>> {
        let live_dir = self.live.join(domain);
        let dane_dir = self.domain_dir(domain);
        if !dane_dir.is_dir() {
            std::fs::create_dir(&dane_dir)?;
        }

        let mut triples = Vec::new();
        for entry in WalkDir::new(&live_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::dane(&live_dir, e.to_string()))?;
            if !entry.path_is_symlink() {
                continue;
            }

            let live = entry.path().to_path_buf();
            let dane = dane_dir.join(entry.file_name());

            match std::fs::symlink_metadata(&dane) {
                Ok(_) if force => {
                    debug!(path = %dane.display(), "Recreating dane symlink");
                    replace_symlink(&dane, &live)?;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %dane.display(), "Creating dane symlink");
                    std::os::unix::fs::symlink(&live, &dane)?;
                }
                Err(e) => return Err(e.into()),
            }

            let archive = resolve_link(&live)?;
            triples.push(CertTriple { dane, live, archive });
        }

        Ok(triples)
    }

    /// Certificate triples of one domain as they are on disk right now
    pub fn triples(&self, domain: &str) -> DaneResult<Vec<CertTriple>> {
        let mut triples = Vec::new();
        for name in self.entries(domain)? {
            let live = self.live.join(domain).join(&name);
            let archive = resolve_link(&live)?;
            triples.push(CertTriple {
                dane: self.domain_dir(domain).join(&name),
                live,
                archive,
            });
        }
        Ok(triples)
    }

    /// Point each dane symlink of `domain` straight at the archive file its
    /// live symlink currently resolves to. Returns how many links changed.
    ///
    /// A dane symlink that already resolves to a regular file is pivoted
    /// already and left alone. A dane path that is not a symlink at all is
    /// reported and never touched.
    pub fn pivot_to_archive(&self, domain: &str) -> DaneResult<usize> {
        let dane_dir = self.domain_dir(domain);
        let mut changed = 0;
        let mut failures = Vec::new();

        for name in self.entries(domain)? {
            let dane = dane_dir.join(&name);
            match self.pivot_file_to_archive(&dane_dir, &dane) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => failures.push(format!("{}: {}", name, e)),
            }
        }

        if !failures.is_empty() {
            return Err(Error::dane(dane_dir, failures.join("; ")));
        }
        if changed > 0 {
            info!(domain = %domain, links = changed, "Pivoted dane symlinks to archive");
        }
        Ok(changed)
    }

    fn pivot_file_to_archive(&self, dane_dir: &Path, dane: &Path) -> DaneResult<bool> {
        ensure_symlink(dane)?;

        let target = resolve_link(dane)?;
        let target_meta = std::fs::symlink_metadata(&target)
            .map_err(|e| Error::dane(&target, format!("dangling dane symlink: {}", e)))?;
        if !target_meta.file_type().is_symlink() {
            return Ok(false);
        }

        let archive = resolve_link(&target)?;
        replace_symlink(dane, &relative_path(&archive, dane_dir))?;
        Ok(true)
    }

    /// Point each dane symlink of `domain` back at its live symlink.
    /// Returns how many links changed.
    pub fn pivot_to_live(&self, domain: &str) -> DaneResult<usize> {
        let dane_dir = self.domain_dir(domain);
        let live_dir = self.live.join(domain);
        let mut changed = 0;
        let mut failures = Vec::new();

        for name in self.entries(domain)? {
            let dane = dane_dir.join(&name);
            let live = live_dir.join(&name);
            let result = ensure_symlink(&dane)
                .and_then(|_| {
                    std::fs::symlink_metadata(&live)
                        .map_err(|e| Error::dane(&live, format!("live symlink missing: {}", e)))
                })
                .and_then(|_| {
                    if resolve_link(&dane)? == live {
                        return Ok(false);
                    }
                    replace_symlink(&dane, &live)?;
                    Ok(true)
                });

            match result {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => failures.push(format!("{}: {}", name, e)),
            }
        }

        if !failures.is_empty() {
            return Err(Error::dane(dane_dir, failures.join("; ")));
        }
        if changed > 0 {
            info!(domain = %domain, links = changed, "Pivoted dane symlinks to live");
        }
        Ok(changed)
    }

    /// True when any dane symlink of `domain` points somewhere other than
    /// its live symlink
    pub fn is_pivoted(&self, domain: &str) -> DaneResult<bool> {
        for name in self.entries(domain)? {
            let dane = self.domain_dir(domain).join(&name);
            if resolve_link(&dane)? != self.live.join(domain).join(&name) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Names in the dane directory of `domain`, sorted
    fn entries(&self, domain: &str) -> DaneResult<Vec<String>> {
        let dane_dir = self.domain_dir(domain);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dane_dir)
            .map_err(|e| Error::dane(&dane_dir, e.to_string()))?
        {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn ensure_symlink(path: &Path) -> DaneResult<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if !meta.file_type().is_symlink() {
        return Err(Error::ForeignFile(path.to_path_buf()));
    }
    Ok(())
}

/// Unlink then create; the process lock keeps other writers out
fn replace_symlink(link: &Path, target: &Path) -> DaneResult<()> {
    match std::fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

/// Follow one level of symlink, returning an absolute, normalized path
fn resolve_link(link: &Path) -> DaneResult<PathBuf> {
    let target = std::fs::read_link(link)
        .map_err(|e| Error::dane(link, format!("not a readable symlink: {}", e)))?;
    let parent = link.parent().unwrap_or_else(|| Path::new("/"));
    Ok(normalize(&parent.join(target)))
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of `target` relative to directory `base`; both must be absolute
pub fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    out
}
