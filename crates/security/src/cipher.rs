//! Symmetric encryption for conversation content at rest.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per value. Encrypted values
//! are self-describing text tokens, `enc:v1:<base64(nonce || ciphertext)>`,
//! so they fit in a TEXT column.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Prefix carried by every token this cipher produces.
pub const TOKEN_PREFIX: &str = "enc:v1:";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// An encryption context bound to one key.
#[derive(Clone)]
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Create a cipher from a standard-base64 encoded 32-byte key.
    pub fn from_base64_key(key: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| CipherError::InvalidKey(format!("not valid base64: {e}")))?;
        Self::from_key_bytes(&bytes)
    }

    /// Derive the key as the SHA-256 digest of a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CipherError> {
        if passphrase.is_empty() {
            return Err(CipherError::InvalidKey("passphrase is empty".into()));
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        Self::from_key_bytes(&digest)
    }

    /// Accept either form a user may configure: a base64 32-byte key is
    /// used as-is, anything else is treated as a passphrase.
    pub fn from_config_value(value: &str) -> Result<Self, CipherError> {
        match Self::from_base64_key(value) {
            Ok(cipher) => Ok(cipher),
            Err(_) => Self::from_passphrase(value),
        }
    }

    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let aead = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self { aead })
    }

    /// Encrypt a plaintext string into a token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce_bytes = generate_nonce();
        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{TOKEN_PREFIX}{}", STANDARD.encode(payload)))
    }

    /// Decrypt a token produced by [`Cipher::encrypt`] under the same key.
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let encoded = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| CipherError::Decryption("missing token prefix".into()))?;
        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::Decryption(format!("bad base64: {e}")))?;
        if payload.len() < NONCE_LEN {
            return Err(CipherError::Decryption("token too short".into()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decryption("authentication failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CipherError::Decryption("invalid UTF-8 after decryption".into()))
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(aes-256-gcm, [REDACTED])")
    }
}

/// Generate a fresh random key, base64 encoded.
pub fn generate_key() -> String {
    use rand::Rng;
    let mut key = [0u8; KEY_LEN];
    rand::rng().fill(&mut key[..]);
    STANDARD.encode(key)
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::Rng;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce[..]);
    nonce
}

/// Errors from cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed: {0}")]
    Decryption(String),
}

impl From<CipherError> for pulse_core::Error {
    fn from(err: CipherError) -> Self {
        pulse_core::Error::configuration(err.to_string())
    }
}
