//! Upgrade-path revision sources
//!
//! An upgrade path points at a prior config revision, either a local
//! directory or a pinned git ref. Git checkouts land under the tmp dir and
//! are cached per repo locator, so several upgrade paths against the same
//! repository reuse one clone within a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::{FetchOptions, Repository, build::RepoBuilder};

use crate::config::{GitLocator, UpgradeKind, UpgradeSpec};
use crate::error::{CdfError, Result};

pub struct UpgradeCache {
    root: PathBuf,
    /// repo url → clone dir, filled lazily during a run
    clones: BTreeMap<String, PathBuf>,
}

impl UpgradeCache {
    pub fn new(root: PathBuf) -> UpgradeCache {
        UpgradeCache {
            root,
            clones: BTreeMap::new(),
        }
    }

    /// Directory holding the prior revision's config for `upgrade`
    pub fn revision_dir(&mut self, upgrade: &UpgradeSpec, config_dir: &Path) -> Result<PathBuf> {
        let base = match upgrade.kind {
            UpgradeKind::Local => config_dir.to_path_buf(),
            UpgradeKind::Git => {
                let Some(locator) = &upgrade.git else {
                    return Err(CdfError::ConfigInvalid {
                        message: format!("upgrade '{}' has type git but no git locator", upgrade.name),
                    });
                };
                self.checkout(locator)?
            }
        };
        Ok(join_sub_path(&base, &upgrade.path))
    }

    fn checkout(&mut self, locator: &GitLocator) -> Result<PathBuf> {
        let dir = match self.clones.get(&locator.repo) {
            Some(dir) => dir.clone(),
            None => {
                let dir = self.root.join(sanitize(&locator.repo));
                crate::common::fs::create_dir(&self.root)?;
                if !dir.join(".git").exists() {
                    clone(&locator.repo, &dir)?;
                }
                self.clones.insert(locator.repo.clone(), dir.clone());
                dir
            }
        };
        if let Some(git_ref) = locator.requested_ref() {
            let repo = Repository::open(&dir)?;
            checkout_ref(&repo, git_ref)?;
        }
        Ok(dir)
    }
}

fn clone(url: &str, target: &Path) -> Result<Repository> {
    let fetch_options = FetchOptions::new();
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options);
    builder.clone(url, target).map_err(|e| CdfError::GitCloneFailed {
        url: url.to_string(),
        reason: e.message().to_string(),
    })
}

/// Detach HEAD at the requested ref and force-checkout the working tree
fn checkout_ref(repo: &Repository, git_ref: &str) -> Result<()> {
    let commit = resolve_reference(repo, git_ref)?;
    repo.set_head_detached(commit.id())?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;
    Ok(())
}

fn resolve_reference<'a>(repo: &'a Repository, refname: &str) -> Result<git2::Commit<'a>> {
    let candidates = [
        refname.to_string(),
        format!("refs/heads/{refname}"),
        format!("refs/tags/{refname}"),
        format!("refs/remotes/origin/{refname}"),
    ];
    for candidate in &candidates {
        if let Ok(reference) = repo.find_reference(candidate) {
            if let Ok(commit) = reference.peel_to_commit() {
                return Ok(commit);
            }
        }
    }
    if let Ok(oid) = git2::Oid::from_str(refname) {
        if let Ok(commit) = repo.find_commit(oid) {
            return Ok(commit);
        }
    }
    if let Ok(obj) = repo.revparse_single(refname) {
        if let Ok(commit) = obj.peel_to_commit() {
            return Ok(commit);
        }
    }
    Err(CdfError::GitRefResolveFailed {
        git_ref: refname.to_string(),
        reason: "could not resolve reference".to_string(),
    })
}

/// `path: "/"` means the revision root itself
fn join_sub_path(base: &Path, sub: &str) -> PathBuf {
    let trimmed = sub.trim_start_matches('/');
    if trimmed.is_empty() {
        base.to_path_buf()
    } else {
        base.join(trimmed)
    }
}

fn sanitize(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
