use std::fmt;

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;

use super::CipherError;

/// Fixed salt so a passphrase always derives the same key.
const KEY_SALT: &[u8] = b"newswatch-credential-cipher";

/// XChaCha20 nonce length in bytes
const NONCE_LEN: usize = 24;

/// Poly1305 tag length in bytes
const TAG_LEN: usize = 16;

/// Seals credential strings into base64 tokens and opens them again.
///
/// Clone is cheap and shares nothing mutable; every `encrypt` call draws a
/// fresh nonce from the OS RNG.
#[derive(Clone)]
pub struct CredentialCipher {
    aead: XChaCha20Poly1305,
}

impl CredentialCipher {
    /// Derive the key from `passphrase` and build the cipher.
    pub fn new(passphrase: &str) -> Result<Self, CipherError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), KEY_SALT, &mut key)
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Encrypt `plaintext` into a self-contained token.
    /// Empty input gives an empty token so "no credential yet" stays cheap to spot.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .aead
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);
        Ok(STANDARD.encode(raw))
    }

    /// Decrypt a token, reporting exactly why it could not be opened.
    pub fn open(&self, token: &str) -> Result<String, CipherError> {
        if token.is_empty() {
            return Ok(String::new());
        }

        let raw = STANDARD.decode(token)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated(raw.len()));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .aead
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Authentication)?;

        Ok(String::from_utf8(plain)?)
    }

    /// Decrypt a token, treating any failure as "credential unavailable".
    ///
    /// Session records can be read while another caller is tearing them
    /// down, so a bad token is never worth an error at the read site.
    pub fn decrypt(&self, token: &str) -> String {
        self.open(token).unwrap_or_else(|e| {
            debug!(error = %e, "Credential token could not be opened");
            String::new()
        })
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new("test-passphrase").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        for plain in ["a", "student@example.com", "pässwörd with spaces", "🔐"] {
            let token = cipher.encrypt(plain).unwrap();
            assert_ne!(token, plain);
            assert_eq!(cipher.decrypt(&token), plain);
        }
    }

    #[test]
    fn test_empty_is_passthrough() {
        let cipher = cipher();
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt(""), "");
        assert_eq!(cipher.open("").unwrap(), "");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = cipher();
        let first = cipher.encrypt("same").unwrap();
        let second = cipher.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_same_passphrase_same_key() {
        let token = cipher().encrypt("secret").unwrap();
        assert_eq!(cipher().decrypt(&token), "secret");
    }

    #[test]
    fn test_foreign_key_fails_soft() {
        let token = cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::new("another-passphrase").unwrap();
        assert!(matches!(other.open(&token), Err(CipherError::Authentication)));
        assert_eq!(other.decrypt(&token), "");
    }

    #[test]
    fn test_any_flipped_byte_is_rejected() {
        let cipher = cipher();
        let token = cipher.encrypt("hunter2").unwrap();

        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(cipher.decrypt(&tampered), "", "byte {} flipped", i);
        }
    }

    #[test]
    fn test_malformed_tokens() {
        let cipher = cipher();
        assert!(matches!(cipher.open("not base64!"), Err(CipherError::Encoding(_))));
        assert!(matches!(cipher.open("AAAA"), Err(CipherError::Truncated(3))));
        assert_eq!(cipher.decrypt("AAAA"), "");
    }

    #[test]
    fn test_debug_hides_key() {
        assert_eq!(format!("{:?}", cipher()), "CredentialCipher { .. }");
    }
}
