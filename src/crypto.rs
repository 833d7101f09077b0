//! The credential "secret box" (§4.8, §9 Credential storage): encrypts the
//! `Basic <base64(user:pass)>` header value at rest under a device-derived
//! AES-128 key, in 16-byte blocks padded with ASCII spaces.
//!
//! The device-id source is an abstract capability ([`DeviceKey`]) rather
//! than hardwired, per the design note that a device backend would derive
//! it from hardware identity while a host backend substitutes a
//! file-scoped key — out of this crate's reach either way.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use base64::Engine;
use rand::RngCore;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

const BLOCK: usize = 16;

pub trait DeviceKey {
    fn derive_key(&self) -> [u8; 16];
}

/// Host-backend `DeviceKey`: a random key generated on first use and
/// persisted alongside the repo.
pub struct FileDeviceKey {
    key: [u8; 16],
}

impl FileDeviceKey {
    pub fn open_or_create(key_path: impl AsRef<Path>) -> Result<Self> {
        let path = key_path.as_ref();
        if let Ok(bytes) = fs::read(path) {
            if let Ok(key) = bytes.try_into() {
                return Ok(FileDeviceKey { key });
            }
        }
        let mut key = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key);
        fs::write(path, key)?;
        Ok(FileDeviceKey { key })
    }
}

impl DeviceKey for FileDeviceKey {
    fn derive_key(&self) -> [u8; 16] {
        self.key
    }
}

pub fn encrypt_basic_auth(user: &str, pass: &str, key: &impl DeviceKey) -> Vec<u8> {
    let basic = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
    );
    let mut padded = basic.into_bytes();
    let pad_len = (BLOCK - (padded.len() % BLOCK)) % BLOCK;
    padded.extend(std::iter::repeat(b' ').take(pad_len));

    let cipher = Aes128::new(GenericArray::from_slice(&key.derive_key()));
    let mut out = Vec::with_capacity(padded.len());
    for chunk in padded.chunks(BLOCK) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

pub fn decrypt_basic_auth(ciphertext: &[u8], key: &impl DeviceKey) -> Result<String> {
    if ciphertext.len() % BLOCK != 0 {
        return Err(Error::Remote {
            status: 0,
            message: "corrupt credential ciphertext length".into(),
        });
    }
    let cipher = Aes128::new(GenericArray::from_slice(&key.derive_key()));
    let mut out = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks(BLOCK) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    // Trailing space padding is tolerated by HTTP header parsing once
    // trimmed (§9 Credential storage).
    while out.last() == Some(&b' ') {
        out.pop();
    }
    String::from_utf8(out).map_err(|_| Error::Remote {
        status: 0,
        message: "corrupt credential ciphertext".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedKey([u8; 16]);
    impl DeviceKey for FixedKey {
        fn derive_key(&self) -> [u8; 16] {
            self.0
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrips() {
        let key = FixedKey([9u8; 16]);
        let ciphertext = encrypt_basic_auth("alice", "hunter2", &key);
        assert_eq!(ciphertext.len() % BLOCK, 0);
        let plain = decrypt_basic_auth(&ciphertext, &key).unwrap();
        assert!(plain.starts_with("Basic "));
        let b64 = plain.trim_start_matches("Basic ");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap();
        assert_eq!(decoded, b"alice:hunter2");
    }

    #[test]
    fn decrypting_with_wrong_key_does_not_round_trip() {
        let right = FixedKey([1u8; 16]);
        let wrong = FixedKey([2u8; 16]);
        let ciphertext = encrypt_basic_auth("bob", "swordfish", &right);
        // With a different key the bytes won't even be valid UTF-8 except
        // by extraordinary coincidence.
        assert!(decrypt_basic_auth(&ciphertext, &wrong).is_err());
    }
}
