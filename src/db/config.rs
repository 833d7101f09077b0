//! The config database (§3 Config Entries): upstream URL, optional cone
//! prefix, and an optional encrypted Basic-auth credential per URL.

use super::kv::{FlatStore, KvStore};
use crate::error::Result;

const KEY_REPO: &[u8] = b"repo";
const KEY_CONE: &[u8] = b"cone";

pub struct ConfigDb {
    store: FlatStore,
}

fn auth_key(url: &str) -> Vec<u8> {
    format!("Basic HTTP auth for {url}").into_bytes()
}

impl ConfigDb {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(ConfigDb {
            store: FlatStore::open(path)?,
        })
    }

    pub fn repo_url(&self) -> Option<String> {
        self.store.get(KEY_REPO).map(|v| String::from_utf8_lossy(&v).into_owned())
    }

    pub fn set_repo_url(&mut self, url: &str) {
        self.store.put(KEY_REPO, url.as_bytes().to_vec());
    }

    /// The cone prefix, already stripped of its JSON quoting and kept with
    /// its trailing slash (§3 Config Entries).
    pub fn cone(&self) -> Option<String> {
        self.store.get(KEY_CONE).map(|v| String::from_utf8_lossy(&v).into_owned())
    }

    pub fn set_cone(&mut self, cone: &str) {
        let normalized = if cone.ends_with('/') {
            cone.to_string()
        } else {
            format!("{cone}/")
        };
        self.store.put(KEY_CONE, normalized.into_bytes());
    }

    pub fn encrypted_auth(&self, url: &str) -> Option<Vec<u8>> {
        self.store.get(&auth_key(url))
    }

    pub fn set_encrypted_auth(&mut self, url: &str, ciphertext: Vec<u8>) {
        self.store.put(&auth_key(url), ciphertext);
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cone_gets_a_trailing_slash_normalized_in() {
        let dir = tempdir().unwrap();
        let mut cfg = ConfigDb::open(dir.path().join("config")).unwrap();
        cfg.set_cone("subdir");
        assert_eq!(cfg.cone().unwrap(), "subdir/");
    }

    #[test]
    fn repo_and_auth_roundtrip() {
        let dir = tempdir().unwrap();
        let mut cfg = ConfigDb::open(dir.path().join("config")).unwrap();
        cfg.set_repo_url("https://example.test/x.git");
        cfg.set_encrypted_auth("https://example.test/x.git", vec![1, 2, 3, 4]);
        assert_eq!(cfg.repo_url().unwrap(), "https://example.test/x.git");
        assert_eq!(
            cfg.encrypted_auth("https://example.test/x.git").unwrap(),
            vec![1, 2, 3, 4]
        );
    }
}
