//! The refs database (§3 Refs Entry): ref name -> 20-byte SHA-1, rewritten
//! wholesale on every fetch advertisement (§4.5.1).

use super::kv::{FlatStore, KvStore};
use crate::error::{Error, Result};

pub struct RefsDb {
    store: FlatStore,
}

impl RefsDb {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(RefsDb {
            store: FlatStore::open(path)?,
        })
    }

    pub fn get(&self, name: &[u8]) -> Option<[u8; 20]> {
        self.store
            .get(name)
            .and_then(|v| v.try_into().ok())
    }

    pub fn put(&mut self, name: &[u8], oid: [u8; 20]) {
        self.store.put(name, oid.to_vec());
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.store.contains(name)
    }

    /// Clears all entries; the advertisement phase treats itself as
    /// authoritative and rewrites the whole table (§4.5.1).
    pub fn clear(&mut self) {
        for key in self.store.keys() {
            self.store.delete(&key);
        }
    }

    pub fn names(&self) -> Vec<Vec<u8>> {
        self.store.keys()
    }

    pub fn names_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.names()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

/// Resolves a user-supplied ref string to a 20-byte object id (§6 Ref
/// resolution): a 40-hex string is treated as a literal SHA-1; otherwise
/// the name is checked as-is, then with `refs/heads/`, `refs/tags/`,
/// `refs/pull/` prefixes in that order, first hit wins.
pub fn resolve(refs: &RefsDb, ref_str: &str) -> Result<[u8; 20]> {
    try_resolve(refs, ref_str)?.ok_or_else(|| Error::UnknownRef(ref_str.to_string()))
}

/// Same precedence as [`resolve`], but a miss is `Ok(None)` rather than
/// `Err(UnknownRef)` — mirrors `_ref_to_commit` in the original, which
/// returns `None` for an unborn/absent ref (e.g. `HEAD` on an empty
/// repo) and lets the caller decide whether that's fatal. `fetch`/`clone`
/// use this so fetching an empty remote isn't an error; `checkout`/
/// `status`/`log` go through `resolve` instead, since those must fail on
/// an unresolvable ref.
pub fn try_resolve(refs: &RefsDb, ref_str: &str) -> Result<Option<[u8; 20]>> {
    if ref_str.len() == 40 && ref_str.bytes().all(|b| b.is_ascii_hexdigit()) {
        return crate::object::from_hex(ref_str).map(Some);
    }
    let candidates = [
        ref_str.to_string(),
        format!("refs/heads/{ref_str}"),
        format!("refs/tags/{ref_str}"),
        format!("refs/pull/{ref_str}"),
    ];
    for candidate in candidates {
        if let Some(oid) = refs.get(candidate.as_bytes()) {
            return Ok(Some(oid));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_prefers_exact_name_then_heads_then_tags_then_pull() {
        let dir = tempdir().unwrap();
        let mut db = RefsDb::open(dir.path().join("refs")).unwrap();
        db.put(b"refs/tags/v1", [1u8; 20]);
        db.put(b"refs/pull/v1", [2u8; 20]);
        assert_eq!(resolve(&db, "v1").unwrap(), [1u8; 20]);

        db.put(b"refs/heads/v1", [3u8; 20]);
        assert_eq!(resolve(&db, "v1").unwrap(), [3u8; 20]);

        db.put(b"v1", [4u8; 20]);
        assert_eq!(resolve(&db, "v1").unwrap(), [4u8; 20]);
    }

    #[test]
    fn resolve_accepts_a_bare_sha1() {
        let dir = tempdir().unwrap();
        let db = RefsDb::open(dir.path().join("refs")).unwrap();
        let sha = "4137faef1d9a7c9ac157fda07724835566c1ae3d";
        let oid = resolve(&db, sha).unwrap();
        assert_eq!(crate::object::to_hex(&oid), sha);
    }

    #[test]
    fn resolve_fails_for_unknown_ref() {
        let dir = tempdir().unwrap();
        let db = RefsDb::open(dir.path().join("refs")).unwrap();
        assert!(resolve(&db, "nope").is_err());
    }

    #[test]
    fn try_resolve_returns_none_instead_of_erroring_on_an_empty_repo() {
        let dir = tempdir().unwrap();
        let db = RefsDb::open(dir.path().join("refs")).unwrap();
        assert_eq!(try_resolve(&db, "HEAD").unwrap(), None);
    }
}
