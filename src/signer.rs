//! Event signing collaborator.
//!
//! The engine never signs anything itself; it consumes the [`Signer`] trait.
//! [`KeypairSigner`] is the default implementation over a secp256k1 Schnorr
//! keypair, with the id derived from the canonical event hash.

use secp256k1::{All, Keypair, Message, Secp256k1};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::{event_hash, Event};

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("secret key is not valid hex")]
    BadHex,
    #[error("secret key is out of range")]
    BadKey,
    #[error("event could not be hashed: {0}")]
    Hash(String),
}

/// Signing identity for outgoing events.
pub trait Signer: Send + Sync {
    /// Hex public key of this identity.
    fn pubkey(&self) -> String;

    /// Stamp `pubkey`, derive the id from the event hash, and attach a
    /// Schnorr signature.
    fn sign(&self, event: &mut Event) -> Result<(), SignerError>;
}

/// Local secp256k1 keypair signer.
pub struct KeypairSigner {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl KeypairSigner {
    /// Build from 32 raw secret-key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let secp = Secp256k1::new();
        let keypair =
            Keypair::from_seckey_slice(&secp, bytes).map_err(|_| SignerError::BadKey)?;
        Ok(Self { secp, keypair })
    }

    /// Build from a hex-encoded secret key.
    pub fn from_secret_hex(hex_key: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| SignerError::BadHex)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Derive the secret as SHA-256 of a passphrase, so a memorable phrase
    /// can stand in for a raw key.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, SignerError> {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self::from_secret_bytes(&digest)
    }
}

impl Signer for KeypairSigner {
    fn pubkey(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    fn sign(&self, event: &mut Event) -> Result<(), SignerError> {
        event.pubkey = self.pubkey();
        let hash = event_hash(event).map_err(|e| SignerError::Hash(e.to_string()))?;
        event.id = hex::encode(hash);
        let msg =
            Message::from_digest_slice(&hash).map_err(|e| SignerError::Hash(e.to_string()))?;
        let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        event.sig = hex::encode(sig.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Tag, KIND_ARTICLE};
    use secp256k1::{schnorr::Signature, XOnlyPublicKey};

    fn unsigned_event() -> Event {
        Event {
            id: String::new(),
            pubkey: String::new(),
            kind: KIND_ARTICLE,
            created_at: 1,
            tags: vec![Tag::pair("d", "slug"), Tag::pair("title", "Slug")],
            content: "body".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn sign_fills_pubkey_id_and_valid_signature() {
        let signer = KeypairSigner::from_secret_bytes(&[1u8; 32]).unwrap();
        let mut ev = unsigned_event();
        signer.sign(&mut ev).unwrap();

        assert_eq!(ev.pubkey, signer.pubkey());
        let hash = event_hash(&ev).unwrap();
        assert_eq!(ev.id, hex::encode(hash));

        let secp = Secp256k1::verification_only();
        let sig = Signature::from_slice(&hex::decode(&ev.sig).unwrap()).unwrap();
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey).unwrap()).unwrap();
        let msg = Message::from_digest_slice(&hash).unwrap();
        secp.verify_schnorr(&sig, &msg, &pk).unwrap();
    }

    #[test]
    fn ids_differ_per_event() {
        let signer = KeypairSigner::from_secret_bytes(&[1u8; 32]).unwrap();
        let mut a = unsigned_event();
        let mut b = unsigned_event();
        b.content = "other body".into();
        signer.sign(&mut a).unwrap();
        signer.sign(&mut b).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn passphrase_keys_are_deterministic() {
        let a = KeypairSigner::from_passphrase("correct horse").unwrap();
        let b = KeypairSigner::from_passphrase("correct horse").unwrap();
        let c = KeypairSigner::from_passphrase("battery staple").unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
        assert_ne!(a.pubkey(), c.pubkey());
    }

    #[test]
    fn hex_constructor_validates() {
        assert!(matches!(
            KeypairSigner::from_secret_hex("zz"),
            Err(SignerError::BadHex)
        ));
        assert!(matches!(
            KeypairSigner::from_secret_hex(&"00".repeat(32)),
            Err(SignerError::BadKey)
        ));
        let hex_key = "01".repeat(32);
        assert!(KeypairSigner::from_secret_hex(&hex_key).is_ok());
    }
}
