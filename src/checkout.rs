//! Checkout and status (§4.7): materializes a working tree from a walked
//! commit tree, computing per-file status against what's already on disk,
//! and removes files the target commit dropped relative to its parent.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::db::IndexDb;
use crate::error::{Error, Result};
use crate::object::{self, Kind};
use crate::pack::PackObjectReader;
use crate::tree::{self, Backfill, TreeEntry};

/// File status relative to what's checked out, as reported by `status`
/// (§4.7). `None` means identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Modified,
    Deleted,
}

fn pack_path(git_dir: &Path, pack_id: u64) -> PathBuf {
    git_dir.join(format!("{pack_id}.pack"))
}

/// Restricts `entries` to those inside `cone` (if set), re-rooting their
/// paths by stripping the cone prefix so the subtree becomes the
/// working-tree root (§4.7 Cone mode, §9: always `Path::strip_prefix`
/// then `worktree.join(...)`, never string slicing).
fn apply_cone<'a>(
    entries: &'a [TreeEntry],
    worktree: &Path,
    repo_root: &Path,
    cone: Option<&str>,
) -> Vec<(PathBuf, &'a TreeEntry)> {
    let cone_path = cone.map(Path::new);
    entries
        .iter()
        .filter_map(|entry| {
            let relative = entry.path.strip_prefix(repo_root).unwrap_or(&entry.path);
            let rerooted = match cone_path {
                Some(prefix) => relative.strip_prefix(prefix).ok()?,
                None => relative,
            };
            Some((worktree.join(rerooted), entry))
        })
        .collect()
}

/// Hashes the on-disk file at `path` under the canonical `"blob
/// <size>\x00..."` framing and compares it to `expected` (§4.7 step 2-3).
fn file_status(path: &Path, expected: &[u8; 20]) -> Result<Option<FileStatus>> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(FileStatus::Deleted)),
        Err(e) => return Err(e.into()),
    };
    let digest = object::digest_bytes(Kind::Blob, &data)?;
    if &digest == expected {
        Ok(None)
    } else {
        Ok(Some(FileStatus::Modified))
    }
}

/// `checkout_file` (§4.7): looks up `target_sha`, computes status against
/// the on-disk file, and — if `write` and something changed — overwrites
/// the file from the pack.
pub fn checkout_file(
    git_dir: &Path,
    idx: &IndexDb,
    path: &Path,
    target_sha: [u8; 20],
    write: bool,
) -> Result<Option<FileStatus>> {
    let entry = idx
        .get(&target_sha)?
        .ok_or_else(|| Error::MissingObject(object::to_hex(&target_sha)))?;
    let status = file_status(path, &target_sha)?;
    if write && status.is_some() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let pack = pack_path(git_dir, entry.pack_id);
        let mut reader = PackObjectReader::open(&pack, entry.header_start)?;
        let mut out = File::create(path)?;
        reader.copy_to(&mut out)?;
    }
    Ok(status)
}

/// Applies the executable bit from a tree entry's wire mode (`100755` vs
/// `100644`) on unix-like hosts; a no-op elsewhere (§4.9 CLI front-end
/// note on the directory/file I/O adapter's permission call).
#[cfg(unix)]
fn apply_mode(path: &Path, mode: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode == "100755" {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: &str) -> Result<()> {
    Ok(())
}

/// `checkout(directory, ref)` (§4.7): walks the target commit's tree,
/// creates directories, skips submodules, writes changed/missing files,
/// and deletes files the parent commit had but the target doesn't
/// (§4.7 Deleted-file cleanup).
pub fn checkout(
    git_dir: &Path,
    idx: &mut IndexDb,
    backfill: &mut impl Backfill,
    worktree: &Path,
    cone: Option<&str>,
    commit_sha: [u8; 20],
) -> Result<()> {
    let commit = tree::get_commit(git_dir, idx, backfill, commit_sha)?;
    let mut entries = Vec::new();
    tree::walk_tree(git_dir, idx, Path::new(""), commit.tree, &mut entries)?;

    let rooted = apply_cone(&entries, worktree, Path::new(""), cone);
    let mut keep: HashSet<PathBuf> = HashSet::new();
    for (path, entry) in &rooted {
        keep.insert(path.clone());
        match entry.mode.as_str() {
            "40000" => {
                if !path.is_dir() {
                    fs::create_dir_all(path)?;
                }
            }
            "160000" => {}
            mode => {
                checkout_file(git_dir, idx, path, entry.target, true)?;
                apply_mode(path, mode)?;
            }
        }
    }

    if let Some(&parent_sha) = commit.parents.first() {
        if idx.contains(&parent_sha) {
            let parent_commit = tree::get_commit(git_dir, idx, backfill, parent_sha)?;
            let mut parent_entries = Vec::new();
            tree::walk_tree(git_dir, idx, Path::new(""), parent_commit.tree, &mut parent_entries)?;
            let parent_rooted = apply_cone(&parent_entries, worktree, Path::new(""), cone);
            for (path, entry) in &parent_rooted {
                if entry.mode == "40000" || entry.mode == "160000" {
                    continue;
                }
                if !keep.contains(path) && path.is_file() {
                    fs::remove_file(path)?;
                }
            }
        }
    }
    Ok(())
}

/// `status(out, ref)` (§4.7): same walk as `checkout` but `write=false`,
/// printing `"A <path>"` / `"M <path>"` / `"D <path>"`. Each add is
/// reported exactly once via `announced_dirs` (§9 known-source-quirk
/// fix).
pub fn status(
    git_dir: &Path,
    idx: &mut IndexDb,
    backfill: &mut impl Backfill,
    worktree: &Path,
    cone: Option<&str>,
    commit_sha: [u8; 20],
    out: &mut impl Write,
) -> Result<bool> {
    let commit = tree::get_commit(git_dir, idx, backfill, commit_sha)?;
    let mut entries = Vec::new();
    tree::walk_tree(git_dir, idx, Path::new(""), commit.tree, &mut entries)?;
    let rooted = apply_cone(&entries, worktree, Path::new(""), cone);

    let mut changed = false;
    let mut announced_dirs: HashSet<PathBuf> = HashSet::new();
    for (path, entry) in &rooted {
        match entry.mode.as_str() {
            "40000" => {
                if !path.is_dir() && announced_dirs.insert(path.clone()) {
                    writeln!(out, "A {}", path.display())?;
                    changed = true;
                }
            }
            "160000" => {}
            _ => {
                if let Some(file_status) = checkout_file(git_dir, idx, path, entry.target, false)? {
                    let code = match file_status {
                        FileStatus::Modified => 'M',
                        FileStatus::Deleted => 'D',
                    };
                    writeln!(out, "{code} {}", path.display())?;
                    changed = true;
                }
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeEntry;

    #[test]
    fn cone_strips_prefix_and_rejoins_worktree() {
        let entries = vec![TreeEntry {
            mode: "100644".to_string(),
            path: PathBuf::from("sub/inner/file.txt"),
            target: [0u8; 20],
        }];
        let rooted = apply_cone(&entries, Path::new("/wt"), Path::new(""), Some("sub/"));
        assert_eq!(rooted.len(), 1);
        assert_eq!(rooted[0].0, PathBuf::from("/wt/inner/file.txt"));
    }

    #[test]
    fn entries_outside_cone_are_dropped() {
        let entries = vec![TreeEntry {
            mode: "100644".to_string(),
            path: PathBuf::from("other/file.txt"),
            target: [0u8; 20],
        }];
        let rooted = apply_cone(&entries, Path::new("/wt"), Path::new(""), Some("sub/"));
        assert!(rooted.is_empty());
    }
}
