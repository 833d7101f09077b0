//! The object index (§3 Index Entry, §4.4): maps a 20-byte object SHA-1 to
//! its pack locator, a fixed 33-byte record.

use super::kv::{KvStore, PagedStore};
use crate::error::{Error, Result};
use crate::object::Kind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub pack_id: u64,
    pub kind_wire: u8,
    pub inflate_start: u64,
    pub inflated_size: u64,
    pub header_start: u64,
}

impl IndexEntry {
    pub fn kind(&self) -> Result<Kind> {
        Kind::from_wire(self.kind_wire)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33);
        out.extend_from_slice(&self.pack_id.to_be_bytes());
        out.push(self.kind_wire);
        out.extend_from_slice(&self.inflate_start.to_be_bytes());
        out.extend_from_slice(&self.inflated_size.to_be_bytes());
        out.extend_from_slice(&self.header_start.to_be_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 33 {
            return Err(Error::CorruptRepository(format!(
                "index record has {} bytes, expected 33",
                bytes.len()
            )));
        }
        Ok(IndexEntry {
            pack_id: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            kind_wire: bytes[8],
            inflate_start: u64::from_be_bytes(bytes[9..17].try_into().unwrap()),
            inflated_size: u64::from_be_bytes(bytes[17..25].try_into().unwrap()),
            header_start: u64::from_be_bytes(bytes[25..33].try_into().unwrap()),
        })
    }
}

pub struct IndexDb {
    store: PagedStore,
}

impl IndexDb {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(IndexDb {
            store: PagedStore::open(path)?,
        })
    }

    pub fn get(&self, oid: &[u8; 20]) -> Result<Option<IndexEntry>> {
        match self.store.get(oid) {
            Some(bytes) => Ok(Some(IndexEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, oid: &[u8; 20]) -> bool {
        self.store.contains(oid)
    }

    pub fn put(&mut self, oid: &[u8; 20], entry: IndexEntry) {
        self.store.put(oid, entry.encode());
    }

    /// All object ids currently indexed, used to build the `have` set in
    /// the fetch negotiation (§4.5.2).
    pub fn oids(&self) -> Vec<[u8; 20]> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|k| k.try_into().ok())
            .collect()
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
    fn entry_roundtrips_through_encode_decode() {
        let entry = IndexEntry {
            pack_id: 1,
            kind_wire: 3,
            inflate_start: 42,
            inflated_size: 1000,
            header_start: 12,
        };
        let bytes = entry.encode();
        assert_eq!(bytes.len(), 33);
        let decoded = IndexEntry::decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn db_put_get_and_oids() {
        let dir = tempdir().unwrap();
        let mut db = IndexDb::open(dir.path().join("idx")).unwrap();
        let oid = [7u8; 20];
        db.put(
            &oid,
            IndexEntry {
                pack_id: 1,
                kind_wire: 1,
                inflate_start: 10,
                inflated_size: 5,
                header_start: 0,
            },
        );
        assert!(db.contains(&oid));
        assert_eq!(db.oids(), vec![oid]);
    }
}
