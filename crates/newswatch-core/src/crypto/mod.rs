//! Encryption of credential fields held in memory.
//!
//! This module provides:
//! - `CredentialCipher`: Argon2id key derivation plus XChaCha20-Poly1305
//!   sealing of strings into self-contained base64 tokens
//! - `CipherError`: the failure cases of the strict `open`/`encrypt` paths
//!
//! Tokens are `base64(nonce || ciphertext || tag)` and need no side channel
//! to decrypt.

pub mod cipher;
pub mod error;

pub use cipher::CredentialCipher;
pub use error::CipherError;
