//! Cryptographic seams consumed by the name-tree runtime.
//!
//! The tree never does cryptography itself; it signs through a [`KeyChain`],
//! decrypts through a [`Decryptor`] and verifies through a [`Validator`],
//! each inherited down the tree like any other node attribute.

pub mod decrypt;
pub mod keychain;
pub mod validate;

pub use decrypt::{DecryptError, Decryptor, XorDecryptor};
pub use keychain::{Ed25519KeyChain, KeyChain, SigningError};
pub use validate::{Ed25519Validator, ValidateError, Validator};
