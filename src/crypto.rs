use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Key, XChaCha20Poly1305, XNonce,
};

use crate::errors::AppError;

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// At-rest cipher for file contents. Stored layout is the 24-byte nonce
/// followed by the ciphertext and tag.
#[derive(Clone)]
pub struct FileCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileCipher(..)")
    }
}

impl FileCipher {
    pub fn from_base64(key_b64: &str) -> anyhow::Result<Self> {
        let raw = base64::engine::general_purpose::STANDARD.decode(key_b64.trim())?;
        if raw.len() != KEY_LEN {
            anyhow::bail!("encryption key must be {KEY_LEN} bytes, got {}", raw.len());
        }
        Ok(Self { cipher: XChaCha20Poly1305::new(Key::from_slice(&raw)) })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| AppError::Internal("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, stored: &[u8]) -> Result<Vec<u8>, AppError> {
        if stored.len() < NONCE_LEN {
            return Err(AppError::Decrypt);
        }
        let (nonce, sealed) = stored.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| AppError::Decrypt)
    }
}

/// Fresh random key, base64 encoded for the config file.
pub fn generate_key() -> String {
    let key = XChaCha20Poly1305::generate_key(&mut OsRng);
    base64::engine::general_purpose::STANDARD.encode(key)
}
