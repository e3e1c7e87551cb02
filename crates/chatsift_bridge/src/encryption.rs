//! Authenticated encryption of context vectors. ChaCha20-Poly1305 with a
//! per-session key; each ciphertext is nonce-prefixed so decryption needs
//! only the key.

use anyhow::{anyhow, Context, Result};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::Rng;

const NONCE_LEN: usize = 12;

pub struct EncryptionManager {
    cipher: ChaCha20Poly1305,
    key_id: String,
}

impl EncryptionManager {
    /// Generate a fresh 256-bit session key and an 8-hex key id.
    pub fn new() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let key_id = hex::encode(rand::rng().random::<[u8; 4]>());
        Self {
            cipher: ChaCha20Poly1305::new(&key),
            key_id,
        }
    }

    pub fn with_key(key_bytes: &[u8; 32], key_id: impl Into<String>) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key_bytes)),
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Serialize as little-endian f32 and encrypt. Output layout:
    /// nonce (12 bytes) || ciphertext+tag.
    pub fn encrypt_vector(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let mut plaintext = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            plaintext.extend_from_slice(&value.to_le_bytes());
        }

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| anyhow!("vector encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_vector(&self, data: &[u8]) -> Result<Vec<f32>> {
        if data.len() < NONCE_LEN {
            return Err(anyhow!("ciphertext too short"));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("vector decryption failed (wrong key or tampered data)"))?;

        if plaintext.len() % 4 != 0 {
            return Err(anyhow!("decrypted payload is not a float vector"));
        }
        plaintext
            .chunks_exact(4)
            .map(|chunk| {
                let bytes: [u8; 4] = chunk.try_into().context("chunk size")?;
                Ok(f32::from_le_bytes(bytes))
            })
            .collect()
    }
}

impl Default for EncryptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trips() {
        let manager = EncryptionManager::new();
        let vector = vec![0.5f32, -1.25, 3.75, 0.0];
        let encrypted = manager.encrypt_vector(&vector).unwrap();
        let decrypted = manager.decrypt_vector(&encrypted).unwrap();
        assert_eq!(vector, decrypted);
    }

    #[test]
    fn ciphertext_hides_plaintext() {
        let manager = EncryptionManager::new();
        let vector = vec![1.0f32; 32];
        let encrypted = manager.encrypt_vector(&vector).unwrap();
        // nonce + ciphertext + 16-byte tag
        assert_eq!(encrypted.len(), NONCE_LEN + 32 * 4 + 16);
        let le_bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_ne!(&encrypted[NONCE_LEN..NONCE_LEN + le_bytes.len()], le_bytes.as_slice());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let manager = EncryptionManager::new();
        let mut encrypted = manager.encrypt_vector(&[1.0, 2.0]).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xff;
        assert!(manager.decrypt_vector(&encrypted).is_err());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let a = EncryptionManager::with_key(&[1u8; 32], "aaaa0000");
        let b = EncryptionManager::with_key(&[2u8; 32], "bbbb0000");
        let encrypted = a.encrypt_vector(&[1.0, 2.0]).unwrap();
        assert!(b.decrypt_vector(&encrypted).is_err());
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let manager = EncryptionManager::new();
        let a = manager.encrypt_vector(&[1.0]).unwrap();
        let b = manager.encrypt_vector(&[1.0]).unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn key_id_is_eight_hex() {
        let manager = EncryptionManager::new();
        assert_eq!(manager.key_id().len(), 8);
        assert!(manager.key_id().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
