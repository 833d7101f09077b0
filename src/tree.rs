//! Commit and tree walking (§4.6): decodes commit headers and recurses a
//! tree in depth-first pre-order, backfilling history via autofetch when a
//! commit SHA isn't locally known yet.

use std::path::{Path, PathBuf};

use crate::db::IndexDb;
use crate::error::{Error, Result};
use crate::object::{self, Kind};
use crate::pack::PackObjectReader;

/// A decoded commit object. Only the header fields the tree walker and
/// `log` need are parsed; the rest of the message is kept as one blob
/// (§3 Commit).
#[derive(Debug, Clone)]
pub struct Commit {
    pub tree: [u8; 20],
    pub parents: Vec<[u8; 20]>,
    pub author: String,
    pub committer: String,
    pub message: String,
}

/// One entry in a tree listing (§3 Tree Entry).
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub mode: String,
    /// Path relative to the working-tree root.
    pub path: PathBuf,
    pub target: [u8; 20],
}

/// A context callers thread through so the tree walker can trigger an
/// autofetch backfill (§4.6, §7) without the walker itself knowing about
/// HTTP transport.
pub trait Backfill {
    /// Attempts to fetch `commit` (and just its own tree/blobs, via
    /// `deepen 1`) so `get_commit` can retry. Returning `Ok(())` does not
    /// guarantee success; the caller re-checks the idx DB afterward.
    fn backfill(&mut self, idx: &mut IndexDb, commit: [u8; 20]) -> Result<()>;
}

fn pack_path(git_dir: &Path, pack_id: u64) -> PathBuf {
    git_dir.join(format!("{pack_id}.pack"))
}

/// Looks up `sha` and opens a [`PackObjectReader`] positioned at its
/// object header.
fn open_object(git_dir: &Path, idx: &IndexDb, sha: &[u8; 20]) -> Result<Option<PackObjectReader>> {
    match idx.get(sha)? {
        Some(entry) => {
            let path = pack_path(git_dir, entry.pack_id);
            Ok(Some(PackObjectReader::open(&path, entry.header_start)?))
        }
        None => Ok(None),
    }
}

/// Decodes the commit at `sha`, auto-fetching it if missing locally
/// (§4.6, §7: `MissingObject` during commit lookup triggers one backfill;
/// still-missing after that is `CorruptRepository`).
pub fn get_commit(
    git_dir: &Path,
    idx: &mut IndexDb,
    backfill: &mut impl Backfill,
    sha: [u8; 20],
) -> Result<Commit> {
    if !idx.contains(&sha) {
        backfill.backfill(idx, sha)?;
    }
    let mut reader = open_object(git_dir, idx, &sha)?
        .ok_or_else(|| Error::CorruptRepository(object::to_hex(&sha)))?;
    if reader.real_kind()? != Kind::Commit {
        return Err(Error::CorruptRepository(object::to_hex(&sha)));
    }
    let bytes = reader.read_all()?;
    parse_commit(&bytes)
}

fn parse_commit(bytes: &[u8]) -> Result<Commit> {
    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = String::new();
    let mut committer = String::new();
    let mut lines = bytes.split(|&b| b == b'\n');
    let mut message_start = bytes.len();
    let mut consumed = 0usize;
    for line in &mut lines {
        consumed += line.len() + 1;
        if line.is_empty() {
            message_start = consumed;
            break;
        }
        let (key, value) = line
            .iter()
            .position(|&b| b == b' ')
            .map(|i| (&line[..i], &line[i + 1..]))
            .ok_or_else(|| Error::CorruptRepository("malformed commit header line".into()))?;
        let value = String::from_utf8_lossy(value).into_owned();
        match key {
            b"tree" => tree = Some(object::from_hex(value.trim())?),
            b"parent" => parents.push(object::from_hex(value.trim())?),
            b"author" => author = value,
            b"committer" => committer = value,
            _ => {}
        }
    }
    let message = if message_start <= bytes.len() {
        String::from_utf8_lossy(&bytes[message_start..]).into_owned()
    } else {
        String::new()
    };
    Ok(Commit {
        tree: tree.ok_or_else(|| Error::CorruptRepository("commit has no tree header".into()))?,
        parents,
        author,
        committer,
        message,
    })
}

/// Walks the tree at `tree_sha`, emitting entries in depth-first
/// pre-order, rooted at `dir` (§4.6). Mode `160000` submodules are
/// emitted too (so callers can recognize and skip them) but never
/// recursed into.
pub fn walk_tree(
    git_dir: &Path,
    idx: &IndexDb,
    dir: &Path,
    tree_sha: [u8; 20],
    out: &mut Vec<TreeEntry>,
) -> Result<()> {
    let mut reader =
        open_object(git_dir, idx, &tree_sha)?.ok_or_else(|| Error::MissingObject(object::to_hex(&tree_sha)))?;
    if reader.real_kind()? != Kind::Tree {
        return Err(Error::CorruptRepository(object::to_hex(&tree_sha)));
    }
    let bytes = reader.read_all()?;

    let mut subdirs = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let nul = bytes[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::CorruptRepository("truncated tree entry".into()))?;
        let header = std::str::from_utf8(&bytes[pos..pos + nul])
            .map_err(|_| Error::CorruptRepository("tree entry header is not UTF-8".into()))?;
        let (mode, name) = header
            .split_once(' ')
            .ok_or_else(|| Error::CorruptRepository("malformed tree entry".into()))?;
        pos += nul + 1;
        if pos + 20 > bytes.len() {
            return Err(Error::CorruptRepository("truncated tree entry sha".into()));
        }
        let target: [u8; 20] = bytes[pos..pos + 20].try_into().unwrap();
        pos += 20;

        let entry_path = dir.join(name);
        if mode == "160000" {
            log::warn!("ignoring submodule {} (unsupported)", entry_path.display());
            out.push(TreeEntry {
                mode: mode.to_string(),
                path: entry_path,
                target,
            });
            continue;
        }
        if mode == "40000" {
            subdirs.push((entry_path.clone(), target));
        }
        out.push(TreeEntry {
            mode: mode.to_string(),
            path: entry_path,
            target,
        });
    }
    for (subdir, target) in subdirs {
        walk_tree(git_dir, idx, &subdir, target, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commit_header_and_message() {
        let raw = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
parent aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
parent bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
author me <me@example.test> 1700000000 +0000\n\
committer me <me@example.test> 1700000000 +0000\n\
\n\
Merge two branches\n";
        let commit = parse_commit(raw).unwrap();
        assert_eq!(object::to_hex(&commit.tree), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
        assert_eq!(commit.parents.len(), 2);
        assert!(commit.author.starts_with("me <me@example.test>"));
        assert_eq!(commit.message, "Merge two branches\n");
    }

    #[test]
    fn root_commit_has_no_parents() {
        let raw = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
author me <me@example.test> 1700000000 +0000\n\
committer me <me@example.test> 1700000000 +0000\n\
\n\
Initial commit\n";
        let commit = parse_commit(raw).unwrap();
        assert!(commit.parents.is_empty());
    }
}
