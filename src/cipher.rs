//! Self-encryption for draft and private note payloads.
//!
//! Draft wrappers carry their inner event encrypted to the author's own key.
//! The engine only depends on the [`SelfCipher`] trait; wallet-backed
//! implementations can be substituted at session construction.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failures while wrapping or unwrapping an encrypted payload.
///
/// During bulk ingestion these are logged and the event discarded; when
/// decrypting the user's own actively edited note they surface to the caller.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("ciphertext is too short to hold a nonce")]
    Truncated,
    #[error("payload does not decrypt under this key")]
    WrongKey,
    #[error("decrypted payload is not utf-8")]
    NotText,
    #[error("encryption failed")]
    Encrypt,
}

/// Symmetric encrypt/decrypt against the session owner's own key.
pub trait SelfCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;
}

/// AES-256-GCM cipher keyed from the user's secret.
///
/// The envelope is `base64(nonce || ciphertext)` with a random 96-bit nonce
/// per message.
pub struct AesSelfCipher {
    key: [u8; 32],
}

impl AesSelfCipher {
    /// Derive the cipher key as SHA-256 of the raw secret.
    pub fn new(secret: &[u8]) -> Self {
        let key = Sha256::digest(secret);
        Self { key: key.into() }
    }
}

impl SelfCipher for AesSelfCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::Encrypt)?;
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;
        let mut envelope = nonce_bytes.to_vec();
        envelope.extend_from_slice(&sealed);
        Ok(BASE64.encode(envelope))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let envelope = BASE64.decode(ciphertext)?;
        if envelope.len() < 12 {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, sealed) = envelope.split_at(12);
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::Encrypt)?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CipherError::WrongKey)?;
        String::from_utf8(plain).map_err(|_| CipherError::NotText)
    }
}
