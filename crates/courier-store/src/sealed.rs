//! At-rest sealing for session files.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::error::StoreError;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals and opens file bodies with ChaCha20-Poly1305.
///
/// Sealed output is base64 of `nonce ‖ ciphertext`, with a fresh random
/// nonce per call.
#[derive(Clone)]
pub struct Sealer {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sealer { .. }")
    }
}

impl Sealer {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Sealer backed by the key file at `path`, generating it when absent.
    pub fn from_key_file(path: &Path) -> Result<Self, StoreError> {
        load_or_create_key(path).map(Self::new)
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, StoreError> {
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| StoreError::Seal("encryption failed".into()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(&combined))
    }

    pub fn open(&self, encoded: &str) -> Result<String, StoreError> {
        let combined = STANDARD
            .decode(encoded.trim())
            .map_err(|_| StoreError::Seal("invalid encoding".into()))?;
        if combined.len() < NONCE_LEN {
            return Err(StoreError::Seal("truncated payload".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| StoreError::Seal("decryption failed".into()))?;

        String::from_utf8(plaintext).map_err(|_| StoreError::Seal("invalid UTF-8".into()))
    }
}

pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut key);
    key
}

/// Load the base64 key at `path`, or create one with 0600 permissions.
pub fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN], StoreError> {
    if path.exists() {
        let encoded = std::fs::read_to_string(path)?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| StoreError::Seal("key file is not base64".into()))?;
        if bytes.len() != KEY_LEN {
            return Err(StoreError::Seal(format!(
                "key file holds {} bytes, expected {KEY_LEN}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let key = generate_key();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, STANDARD.encode(key))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(?path, "generated session sealing key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let sealer = Sealer::new(generate_key());
        let sealed = sealer.seal(r#"{"me":{"id":"1@s.whatsapp.net"}}"#).unwrap();
        assert!(!sealed.contains("whatsapp"));
        assert_eq!(sealer.open(&sealed).unwrap(), r#"{"me":{"id":"1@s.whatsapp.net"}}"#);
    }

    #[test]
    fn nonces_differ_per_call() {
        let sealer = Sealer::new(generate_key());
        assert_ne!(sealer.seal("same").unwrap(), sealer.seal("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = Sealer::new(generate_key()).seal("secret").unwrap();
        let other = Sealer::new(generate_key());
        assert!(matches!(other.open(&sealed), Err(StoreError::Seal(_))));
    }

    #[test]
    fn plaintext_json_is_not_accepted() {
        let sealer = Sealer::new(generate_key());
        assert!(sealer.open(r#"{"creds":1}"#).is_err());
    }

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("session.key");
        let first = load_or_create_key(&path).unwrap();
        let second = load_or_create_key(&path).unwrap();
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn short_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.key");
        std::fs::write(&path, STANDARD.encode([1u8; 8])).unwrap();
        assert!(load_or_create_key(&path).is_err());
    }
}
