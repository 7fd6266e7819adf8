use thiserror::Error;

use crate::crypto::CipherError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to encrypt credentials: {0}")]
    Cipher(#[from] CipherError),
}
