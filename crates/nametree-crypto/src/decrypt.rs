use thiserror::Error;

use nametree_codec::Data;

/// Errors returned by content decryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
    /// The content could not be decrypted with the configured key material.
    #[error("decrypt failed: {0}")]
    Failed(String),
}

/// Trait for content decryptors attached to the tree.
///
/// A real deployment plugs a name-based access-control decryptor in here;
/// the tree only cares about plaintext-or-error.
pub trait Decryptor {
    /// Returns the plaintext for `data`'s content.
    fn decrypt(&self, data: &Data) -> Result<Vec<u8>, DecryptError>;
}

/// Toy reversible decryptor for tests: XORs content with a fixed byte.
///
/// An empty content is treated as undecryptable so tests can exercise the
/// failure path.
#[derive(Debug, Clone, Copy)]
pub struct XorDecryptor {
    pub key: u8,
}

impl XorDecryptor {
    /// "Encrypts" plaintext for test producers; XOR is its own inverse.
    pub fn apply(&self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.iter().map(|b| b ^ self.key).collect()
    }
}

impl Decryptor for XorDecryptor {
    fn decrypt(&self, data: &Data) -> Result<Vec<u8>, DecryptError> {
        if data.content().is_empty() {
            return Err(DecryptError::Failed("empty ciphertext".to_string()));
        }
        Ok(self.apply(data.content()))
    }
}
