use ed25519_dalek::{Signer as DalekSignerTrait, SigningKey, VerifyingKey};
use thiserror::Error;

use nametree_codec::{Data, SignatureValue};
use nametree_core::Name;

/// Errors returned by keychain signing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    /// The signing preimage could not be encoded.
    #[error("cannot encode signing preimage: {0}")]
    Preimage(String),
    /// The configured key refused to sign.
    #[error("key refused to sign: {0}")]
    KeyFailure(String),
}

/// Trait for signing backends attached to the tree.
pub trait KeyChain {
    /// Signs `data` in place, replacing its signature value.
    fn sign(&self, data: &mut Data) -> Result<(), SigningError>;

    /// Name of the certificate the default key signs under.
    fn default_certificate_name(&self) -> Name;
}

/// Ed25519 keychain backed by `ed25519-dalek`.
#[derive(Debug, Clone)]
pub struct Ed25519KeyChain {
    signing_key: SigningKey,
    certificate_name: Name,
}

impl Ed25519KeyChain {
    /// Creates a keychain from a 32-byte secret and a certificate name.
    pub fn from_secret(secret: [u8; 32], certificate_name: Name) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
            certificate_name,
        }
    }

    /// The raw public key for out-of-band verifier setup.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The dalek verifying key for this chain's signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl KeyChain for Ed25519KeyChain {
    fn sign(&self, data: &mut Data) -> Result<(), SigningError> {
        let preimage = data
            .signed_portion_cbor()
            .map_err(|e| SigningError::Preimage(e.to_string()))?;
        let signature = self.signing_key.sign(&preimage);
        data.set_signature(SignatureValue::Ed25519 {
            key_name: self.certificate_name.clone(),
            signature: signature.to_bytes().to_vec(),
        });
        Ok(())
    }

    fn default_certificate_name(&self) -> Name {
        self.certificate_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Ed25519KeyChain, KeyChain};
    use nametree_codec::{Data, SignatureValue};
    use nametree_core::Name;

    #[test]
    fn sign_attaches_key_name_and_signature() {
        let chain = Ed25519KeyChain::from_secret([0x42_u8; 32], Name::parse("/keys/alice"));
        let mut data = Data::new(Name::parse("/a/b"), b"payload".to_vec());
        chain.sign(&mut data).expect("sign should succeed");

        match data.signature() {
            SignatureValue::Ed25519 {
                key_name,
                signature,
            } => {
                assert_eq!(key_name, &Name::parse("/keys/alice"));
                assert_eq!(signature.len(), 64);
            }
            other => panic!("expected ed25519 signature, got {other:?}"),
        }
        assert_eq!(chain.default_certificate_name(), Name::parse("/keys/alice"));
    }

    #[test]
    fn signatures_depend_on_content() {
        let chain = Ed25519KeyChain::from_secret([7_u8; 32], Name::parse("/keys/a"));
        let mut a = Data::new(Name::parse("/x"), b"one".to_vec());
        let mut b = Data::new(Name::parse("/x"), b"two".to_vec());
        chain.sign(&mut a).expect("sign should succeed");
        chain.sign(&mut b).expect("sign should succeed");
        assert_ne!(a.signature(), b.signature());
    }
}
