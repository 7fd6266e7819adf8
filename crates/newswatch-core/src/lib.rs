//! newswatch core - the per-user session store behind the newswatch bot.
//!
//! Each chat user gets at most one session holding their encrypted
//! credentials and, once logged in, a handle to a remote browser. Sessions
//! idle for too long are swept away and their browsers released.
//!
//! ```rust,ignore
//! use newswatch_core::{CredentialCipher, SessionFields, SessionStore, StoreConfig};
//!
//! let cipher = CredentialCipher::new(&passphrase)?;
//! let store = SessionStore::new(StoreConfig::from_env()?, cipher, release_browser);
//! store.start_sweeper().await;
//!
//! store.create_session(chat_id, SessionFields::new().login(login)).await?;
//! ```

pub mod config;
pub mod crypto;
pub mod session;

pub use config::{ConfigError, StoreConfig};
pub use crypto::{CipherError, CredentialCipher};
pub use session::{
    ReleaseError, ResourceReleaser, SessionError, SessionFields, SessionSnapshot, SessionState,
    SessionStore,
};
