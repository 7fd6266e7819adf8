use thiserror::Error;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token too short: {0} bytes")]
    Truncated(usize),

    #[error("Token failed authentication")]
    Authentication,

    #[error("Decrypted credential is not UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
