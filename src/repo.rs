//! The high-level `Repo` API (§6): ties together the refs/idx/config
//! databases, the fetch engine, and checkout/status into the operations
//! the CLI front-end calls 1:1.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::checkout;
use crate::crypto::{encrypt_basic_auth, FileDeviceKey};
use crate::db::{ConfigDb, IndexDb, RefsDb};
use crate::error::{Error, Result};
use crate::fetch;
use crate::object;
use crate::transport::RemoteUrl;
use crate::tree::{self, Backfill};

const DOT_DIR: &str = ".ygit";

fn dot_dir(worktree: &Path) -> PathBuf {
    worktree.join(DOT_DIR)
}

/// Implements [`Backfill`] by borrowing just the pieces a fetch needs,
/// so it can be constructed alongside a separate `&mut IndexDb` borrow
/// without double-borrowing `Repo` itself.
struct FetchBackfill<'a> {
    git_dir: &'a Path,
    url: &'a RemoteUrl,
    config: &'a ConfigDb,
    device_key: &'a FileDeviceKey,
}

impl<'a> Backfill for FetchBackfill<'a> {
    fn backfill(&mut self, idx: &mut IndexDb, commit: [u8; 20]) -> Result<()> {
        fetch::fetch(
            self.git_dir,
            self.url,
            self.config,
            self.device_key,
            idx,
            Some(commit),
            true,
            true,
        )?;
        Ok(())
    }
}

/// A locally checked-out repository: `<worktree>/.ygit/{config,refs,idx,*.pack}`
/// (§6 Persistent layout).
pub struct Repo {
    worktree: PathBuf,
    git_dir: PathBuf,
    config: ConfigDb,
    refs: RefsDb,
    idx: IndexDb,
    device_key: FileDeviceKey,
}

impl Repo {
    /// Opens an already-cloned repository rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let worktree = dir.into();
        let git_dir = dot_dir(&worktree);
        let config = ConfigDb::open(git_dir.join("config"))?;
        let refs = RefsDb::open(git_dir.join("refs"))?;
        let idx = IndexDb::open(git_dir.join("idx"))?;
        let device_key = FileDeviceKey::open_or_create(git_dir.join("devicekey"))?;
        Ok(Repo {
            worktree,
            git_dir,
            config,
            refs,
            idx,
            device_key,
        })
    }

    fn url(&self) -> Result<RemoteUrl> {
        let raw = self.config.repo_url().ok_or_else(|| Error::Remote {
            status: 0,
            message: "repository has no configured url".into(),
        })?;
        RemoteUrl::parse(&raw)
    }

    fn backfill(&self, url: &RemoteUrl) -> FetchBackfill<'_> {
        FetchBackfill {
            git_dir: &self.git_dir,
            url,
            config: &self.config,
            device_key: &self.device_key,
        }
    }

    fn resolve_or(&self, ref_str: Option<&str>, default: &str) -> Result<[u8; 20]> {
        crate::db::refs::resolve(&self.refs, ref_str.unwrap_or(default))
    }

    /// `clone(url, dir, *, ref, shallow, cone, username, password, quiet)`
    /// (§6): creates `.ygit/`, discovers refs, fetches `ref` (default
    /// `HEAD`) and checks it out.
    #[allow(clippy::too_many_arguments)]
    pub fn clone(
        url: &str,
        dir: impl Into<PathBuf>,
        ref_name: Option<&str>,
        shallow: bool,
        cone: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        quiet: bool,
    ) -> Result<Self> {
        let worktree = dir.into();
        let git_dir = dot_dir(&worktree);
        if git_dir.exists() {
            return Err(Error::RepoAlreadyExists(git_dir));
        }
        fs::create_dir_all(&git_dir)?;

        let mut config = ConfigDb::open(git_dir.join("config"))?;
        config.set_repo_url(url);
        if let Some(cone) = cone {
            config.set_cone(cone);
        }
        let device_key = FileDeviceKey::open_or_create(git_dir.join("devicekey"))?;
        if let (Some(user), Some(pass)) = (username, password) {
            let ciphertext = encrypt_basic_auth(user, pass, &device_key);
            config.set_encrypted_auth(url, ciphertext);
        }
        config.flush()?;

        let remote = RemoteUrl::parse(url)?;
        let mut refs = RefsDb::open(git_dir.join("refs"))?;
        fetch::discover_refs(&remote, &config, &device_key, &mut refs)?;
        refs.flush()?;

        let mut idx = IndexDb::open(git_dir.join("idx"))?;
        let target_ref = ref_name.unwrap_or("HEAD");
        // `try_resolve`, not `resolve`: an empty remote advertises no HEAD
        // at all, and that's not an error (§8 S1) — `fetch::fetch` already
        // treats a `None` target as "fetched an empty repo".
        let target = crate::db::refs::try_resolve(&refs, target_ref)?;
        fetch::fetch(
            &git_dir,
            &remote,
            &config,
            &device_key,
            &mut idx,
            target,
            shallow,
            quiet,
        )?;
        idx.flush()?;

        let mut repo = Repo {
            worktree,
            git_dir,
            config,
            refs,
            idx,
            device_key,
        };
        if target.is_some() {
            repo.checkout(Some(target_ref))?;
        }
        Ok(repo)
    }

    /// `.fetch(ref, shallow, quiet)` (§6): re-discovers refs, then fetches
    /// `ref` (default `HEAD`). Returns whether any new objects arrived.
    pub fn fetch(&mut self, ref_name: Option<&str>, shallow: bool, quiet: bool) -> Result<bool> {
        let url = self.url()?;
        fetch::discover_refs(&url, &self.config, &self.device_key, &mut self.refs)?;
        self.refs.flush()?;

        let target_ref = ref_name.unwrap_or("HEAD");
        // See `clone` above: a missing ref resolves to `None` here rather
        // than erroring, since an empty remote is a legitimate fetch target.
        let target = crate::db::refs::try_resolve(&self.refs, target_ref)?;
        let had_new = fetch::fetch(
            &self.git_dir,
            &url,
            &self.config,
            &self.device_key,
            &mut self.idx,
            target,
            shallow,
            quiet,
        )?;
        self.idx.flush()?;
        Ok(had_new)
    }

    /// `.checkout(ref)` (§4.7, §6): materializes `ref`'s tree into the
    /// working directory, respecting cone mode and cleaning up files the
    /// parent commit had but the target doesn't.
    pub fn checkout(&mut self, ref_name: Option<&str>) -> Result<()> {
        let url = self.url()?;
        let target = self.resolve_or(ref_name, "HEAD")?;
        let cone = self.config.cone();
        let mut backfill = self.backfill(&url);
        checkout::checkout(
            &self.git_dir,
            &mut self.idx,
            &mut backfill,
            &self.worktree,
            cone.as_deref(),
            target,
        )
    }

    /// `.pull(ref, shallow, quiet)` (§6): `fetch`, then `checkout` only if
    /// the fetch actually brought in new objects — mirroring `if fetch(...):
    /// checkout(...)` in the original. Skipping the checkout when nothing
    /// changed avoids silently overwriting locally modified files.
    pub fn pull(&mut self, ref_name: Option<&str>, shallow: bool, quiet: bool) -> Result<bool> {
        let had_new = self.fetch(ref_name, shallow, quiet)?;
        if had_new {
            self.checkout(ref_name)?;
        }
        Ok(had_new)
    }

    /// `.status(out, ref)` (§4.7, §6): prints per-file status against
    /// `ref`'s tree without writing anything; returns whether any change
    /// was reported.
    pub fn status(&mut self, out: &mut impl Write, ref_name: Option<&str>) -> Result<bool> {
        let url = self.url()?;
        let target = self.resolve_or(ref_name, "HEAD")?;
        let cone = self.config.cone();
        let mut backfill = self.backfill(&url);
        checkout::status(
            &self.git_dir,
            &mut self.idx,
            &mut backfill,
            &self.worktree,
            cone.as_deref(),
            target,
            out,
        )
    }

    /// `.log(out, ref)` (§6): walks the commit's parent chain, printing
    /// one line per commit until a parent is not locally known.
    pub fn log(&mut self, out: &mut impl Write, ref_name: Option<&str>) -> Result<()> {
        let url = self.url()?;
        let mut backfill = self.backfill(&url);
        let mut sha = self.resolve_or(ref_name, "HEAD")?;
        loop {
            let commit = tree::get_commit(&self.git_dir, &mut self.idx, &mut backfill, sha)?;
            writeln!(out, "commit {}", object::to_hex(&sha))?;
            writeln!(out, "Author: {}", commit.author)?;
            writeln!(out)?;
            for line in commit.message.lines() {
                writeln!(out, "    {line}")?;
            }
            writeln!(out)?;
            match commit.parents.first() {
                Some(&parent) if self.idx.contains(&parent) => sha = parent,
                _ => break,
            }
        }
        Ok(())
    }

    /// Local branch names (`refs/heads/*`), with the prefix stripped.
    pub fn branches(&self) -> Vec<String> {
        strip_prefix_names(&self.refs, b"refs/heads/")
    }

    /// Local tag names (`refs/tags/*`), with the prefix stripped.
    pub fn tags(&self) -> Vec<String> {
        strip_prefix_names(&self.refs, b"refs/tags/")
    }

    /// Locally known pull-request refs (`refs/pull/*`), with the prefix
    /// stripped.
    pub fn pulls(&self) -> Vec<String> {
        strip_prefix_names(&self.refs, b"refs/pull/")
    }

    /// `.update_authentication(user, pass, url)` (§6): encrypts and
    /// stores a Basic-auth credential for `url`.
    pub fn update_authentication(&mut self, user: &str, pass: &str, url: &str) -> Result<()> {
        let ciphertext = encrypt_basic_auth(user, pass, &self.device_key);
        self.config.set_encrypted_auth(url, ciphertext);
        self.config.flush()
    }
}

fn strip_prefix_names(refs: &RefsDb, prefix: &[u8]) -> Vec<String> {
    refs.names_with_prefix(prefix)
        .into_iter()
        .map(|name| String::from_utf8_lossy(&name[prefix.len()..]).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_dir_lives_under_worktree() {
        let path = dot_dir(Path::new("/tmp/repo"));
        assert_eq!(path, PathBuf::from("/tmp/repo/.ygit"));
    }
}
