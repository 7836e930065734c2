use ed25519_dalek::{Signature, Verifier as DalekVerifierTrait, VerifyingKey};
use thiserror::Error;

use nametree_codec::{Data, SignatureValue};

/// Errors returned by packet validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    /// The packet's signature does not verify.
    #[error("validation rejected: {0}")]
    Rejected(String),
}

/// Trait for Data packet validators attached to the tree.
///
/// Runs when a packet arrives, independent of deserialization.
pub trait Validator {
    fn validate(&self, data: &Data) -> Result<(), ValidateError>;
}

/// Validator that checks Ed25519 signatures against one trusted key.
///
/// Digest-only signatures pass: their integrity is carried by a signed
/// `_manifest` instead of a per-packet signature.
#[derive(Debug, Clone)]
pub struct Ed25519Validator {
    trusted_key: VerifyingKey,
}

impl Ed25519Validator {
    pub fn new(trusted_key: VerifyingKey) -> Self {
        Self { trusted_key }
    }

    /// Builds a validator from raw public key bytes.
    pub fn from_public_key(public_key: [u8; 32]) -> Result<Self, ValidateError> {
        let trusted_key = VerifyingKey::from_bytes(&public_key)
            .map_err(|_| ValidateError::Rejected("invalid public key bytes".to_string()))?;
        Ok(Self { trusted_key })
    }
}

impl Validator for Ed25519Validator {
    fn validate(&self, data: &Data) -> Result<(), ValidateError> {
        match data.signature() {
            SignatureValue::Ed25519 { signature, .. } => {
                let preimage = data
                    .signed_portion_cbor()
                    .map_err(|e| ValidateError::Rejected(e.to_string()))?;
                let signature = Signature::from_slice(signature)
                    .map_err(|_| ValidateError::Rejected("malformed signature".to_string()))?;
                self.trusted_key
                    .verify(&preimage, &signature)
                    .map_err(|_| ValidateError::Rejected("signature mismatch".to_string()))
            }
            SignatureValue::DigestSha256 { .. } => Ok(()),
            SignatureValue::Unsigned => {
                Err(ValidateError::Rejected("packet is unsigned".to_string()))
            }
        }
    }
}
