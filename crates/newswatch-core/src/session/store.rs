//! The session store: one encrypted session per user, evicted when idle.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sweeper::Sweeper;
use super::{ResourceReleaser, SessionError};
use crate::config::StoreConfig;
use crate::crypto::CredentialCipher;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created on the first login attempt, no browser attached yet.
    New,
    /// A browser handle is attached.
    Authenticated,
}

/// Fields supplied when creating or updating a session.
/// Unset fields are left untouched by updates.
#[derive(Clone)]
pub struct SessionFields<H> {
    pub login: Option<String>,
    pub password: Option<String>,
    pub handle: Option<H>,
}

impl<H> Default for SessionFields<H> {
    fn default() -> Self {
        Self {
            login: None,
            password: None,
            handle: None,
        }
    }
}

impl<H> SessionFields<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn handle(mut self, handle: H) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl<H: fmt::Debug> fmt::Debug for SessionFields<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFields")
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("handle", &self.handle)
            .finish()
    }
}

/// Decrypted view of a session handed to callers.
#[derive(Clone)]
pub struct SessionSnapshot<H> {
    pub login: String,
    pub password: String,
    pub handle: Option<H>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl<H> SessionSnapshot<H> {
    pub fn state(&self) -> SessionState {
        if self.handle.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::New
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }
}

impl<H: fmt::Debug> fmt::Debug for SessionSnapshot<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("handle", &self.handle)
            .field("created_at", &self.created_at)
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

/// A session as held in the map. Credentials are cipher tokens.
struct StoredSession<H> {
    login: String,
    password: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    /// Monotonic twin of `last_activity`; idle time is measured from this so
    /// wall clock steps never cause early or late eviction.
    last_seen: Instant,
    handle: Option<H>,
}

impl<H> StoredSession<H> {
    /// Record activity. Never moves `last_activity` backwards, even if the
    /// wall clock does.
    fn touch(&mut self) {
        self.last_seen = Instant::now();
        let now = Utc::now();
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

pub(super) struct StoreInner<K, H> {
    sessions: Mutex<HashMap<K, StoredSession<H>>>,
    cipher: CredentialCipher,
    releaser: Arc<dyn ResourceReleaser<H>>,
    config: StoreConfig,
    pub(super) sweeper: Mutex<Option<Sweeper>>,
}

/// Concurrency-safe map from user to session.
///
/// Every operation takes one store-wide lock for its read-modify-write. The
/// lock is never held while a handle is being released: the handle is taken
/// out of the map under the lock, and the release runs afterwards on its own
/// task, bounded by `StoreConfig::release_timeout`.
///
/// Clone is cheap - all clones share the same map.
pub struct SessionStore<K, H> {
    pub(super) inner: Arc<StoreInner<K, H>>,
}

impl<K, H> Clone for SessionStore<K, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, H> SessionStore<K, H>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    H: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        config: StoreConfig,
        cipher: CredentialCipher,
        releaser: impl ResourceReleaser<H>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: Mutex::new(HashMap::new()),
                cipher,
                releaser: Arc::new(releaser),
                config,
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.lock().await.is_empty()
    }

    /// Check for a session without counting it as activity.
    pub async fn contains(&self, user: &K) -> bool {
        self.inner.sessions.lock().await.contains_key(user)
    }

    /// Create (or replace) the session for `user`.
    ///
    /// Returns `Ok(false)` without touching anything if the user already has
    /// a session with a browser attached. A session still mid-login is
    /// overwritten.
    pub async fn create_session(
        &self,
        user: K,
        fields: SessionFields<H>,
    ) -> Result<bool, SessionError> {
        let mut sessions = self.inner.sessions.lock().await;

        if sessions.get(&user).is_some_and(|s| s.handle.is_some()) {
            info!(user = ?user, "Session already active, refusing duplicate login");
            return Ok(false);
        }

        let login = self.seal(fields.login.as_deref())?;
        let password = self.seal(fields.password.as_deref())?;
        let now = Utc::now();

        sessions.insert(
            user.clone(),
            StoredSession {
                login,
                password,
                created_at: now,
                last_activity: now,
                last_seen: Instant::now(),
                handle: fields.handle,
            },
        );
        info!(user = ?user, sessions = sessions.len(), "Session created");
        Ok(true)
    }

    /// Decrypted view of the session for `user`. Counts as activity.
    pub async fn get_session(&self, user: &K) -> Option<SessionSnapshot<H>> {
        let mut sessions = self.inner.sessions.lock().await;
        let session = sessions.get_mut(user)?;
        session.touch();

        Some(SessionSnapshot {
            login: self.inner.cipher.decrypt(&session.login),
            password: self.inner.cipher.decrypt(&session.password),
            handle: session.handle.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        })
    }

    /// Update whichever fields are set in `fields`. No-op if `user` has no session.
    ///
    /// A handle replaced by a different one is released.
    pub async fn update_session_data(
        &self,
        user: &K,
        fields: SessionFields<H>,
    ) -> Result<(), SessionError> {
        let replaced = {
            let mut sessions = self.inner.sessions.lock().await;
            let Some(session) = sessions.get_mut(user) else {
                debug!(user = ?user, "No session to update");
                return Ok(());
            };

            // Seal both before writing either, so a failure leaves the session as it was
            let login = fields.login.as_deref().map(|l| self.seal(Some(l))).transpose()?;
            let password = fields
                .password
                .as_deref()
                .map(|p| self.seal(Some(p)))
                .transpose()?;

            if let Some(login) = login {
                session.login = login;
            }
            if let Some(password) = password {
                session.password = password;
            }
            session.touch();

            fields.handle.and_then(|h| swap_handle(session, h))
        };

        if let Some(old) = replaced {
            self.release(user, old).await;
        }
        Ok(())
    }

    /// Attach the browser handle after a successful login.
    ///
    /// No-op returning `false` if `user` has no session, in which case the
    /// handle is dropped unreleased and stays the caller's to deal with. A
    /// different handle already attached is released.
    pub async fn update_resource_handle(&self, user: &K, handle: H) -> bool {
        let replaced = {
            let mut sessions = self.inner.sessions.lock().await;
            let Some(session) = sessions.get_mut(user) else {
                debug!(user = ?user, "No session to attach handle to");
                return false;
            };
            session.touch();
            swap_handle(session, handle)
        };
        debug!(user = ?user, "Resource handle attached");

        if let Some(old) = replaced {
            self.release(user, old).await;
        }
        true
    }

    /// Remove the session for `user` and release its handle.
    ///
    /// Returns `false` if there was nothing to delete. Of several concurrent
    /// deletes for one user, exactly one returns `true` and releases.
    pub async fn delete_session(&self, user: &K) -> bool {
        let removed = self.inner.sessions.lock().await.remove(user);
        let Some(session) = removed else {
            return false;
        };

        info!(user = ?user, "Session deleted");
        if let Some(handle) = session.handle {
            self.release(user, handle).await;
        }
        true
    }

    /// Remove every session idle for longer than the configured threshold.
    ///
    /// The staleness check and the removal happen under a single lock
    /// acquisition, so activity recorded before the sweep takes the lock
    /// always saves a session.
    pub async fn sweep_idle_sessions(&self) -> usize {
        let threshold = self.inner.config.idle_threshold;

        let evicted: Vec<(K, Option<H>)> = {
            let mut sessions = self.inner.sessions.lock().await;
            let now = Instant::now();
            let stale: Vec<K> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for(now) > threshold)
                .map(|(user, _)| user.clone())
                .collect();

            stale
                .into_iter()
                .filter_map(|user| sessions.remove(&user).map(|s| (user, s.handle)))
                .collect()
        };

        let count = evicted.len();
        for (user, _) in &evicted {
            info!(user = ?user, idle_threshold = ?threshold, "Evicting idle session");
        }
        self.release_all(evicted).await;
        count
    }

    /// Stop the sweeper and tear down every session, releasing all handles.
    /// Returns the number of sessions removed.
    pub async fn shutdown(&self) -> usize {
        self.stop_sweeper().await;

        let drained: Vec<(K, Option<H>)> = self
            .inner
            .sessions
            .lock()
            .await
            .drain()
            .map(|(user, s)| (user, s.handle))
            .collect();

        let count = drained.len();
        info!(sessions = count, "Session store shutting down");
        self.release_all(drained).await;
        count
    }

    fn seal(&self, value: Option<&str>) -> Result<String, SessionError> {
        Ok(self.inner.cipher.encrypt(value.unwrap_or_default())?)
    }

    async fn release_all(&self, sessions: Vec<(K, Option<H>)>) {
        let releases = sessions
            .into_iter()
            .filter_map(|(user, handle)| handle.map(|h| (user, h)))
            .map(move |(user, handle)| async move { self.release(&user, handle).await });
        join_all(releases).await;
    }

    /// Hand `handle` to the release contract on its own task and wait a
    /// bounded time for it. Failures, panics and timeouts are logged only.
    async fn release(&self, user: &K, handle: H) {
        let timeout = self.inner.config.release_timeout;
        let task = tokio::spawn(self.inner.releaser.release(handle));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => debug!(user = ?user, "Resource released"),
            Ok(Ok(Err(e))) => warn!(user = ?user, error = %e, "Resource release failed"),
            Ok(Err(e)) => warn!(user = ?user, error = %e, "Resource release task died"),
            Err(_) => warn!(
                user = ?user,
                ?timeout,
                "Resource release timed out, leaving it to finish in the background"
            ),
        }
    }
}

/// Put `handle` on the session, returning the previous one if it differs.
fn swap_handle<H: PartialEq>(session: &mut StoredSession<H>, handle: H) -> Option<H> {
    match session.handle.replace(handle) {
        Some(old) if session.handle.as_ref() != Some(&old) => Some(old),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ReleaseError;
    use std::sync::Mutex as StdMutex;

    type Released = Arc<StdMutex<Vec<u32>>>;

    fn recording_releaser() -> (Released, impl ResourceReleaser<u32>) {
        let released: Released = Arc::default();
        let log = Arc::clone(&released);
        let releaser = move |handle: u32| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(handle);
                Ok::<(), ReleaseError>(())
            }
        };
        (released, releaser)
    }

    fn store_with(config: StoreConfig) -> (SessionStore<u64, u32>, Released) {
        let cipher = CredentialCipher::new("store-tests").unwrap();
        let (released, releaser) = recording_releaser();
        (SessionStore::new(config, cipher, releaser), released)
    }

    fn store() -> (SessionStore<u64, u32>, Released) {
        store_with(StoreConfig::default())
    }

    async fn failing_release(_handle: u32) -> Result<(), ReleaseError> {
        Err(ReleaseError::new("browser already gone"))
    }

    async fn crashing_release(_handle: u32) -> Result<(), ReleaseError> {
        panic!("driver crashed")
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (store, released) = store();

        assert!(store
            .create_session(1, SessionFields::new().login("a"))
            .await
            .unwrap());

        let session = store.get_session(&1).await.unwrap();
        assert_eq!(session.login, "a");
        assert_eq!(session.password, "");
        assert_eq!(session.handle, None);
        assert_eq!(session.state(), SessionState::New);

        assert!(store.update_resource_handle(&1, 42).await);
        let session = store.get_session(&1).await.unwrap();
        assert_eq!(session.handle, Some(42));
        assert_eq!(session.login, "a");
        assert!(session.is_authenticated());

        assert!(store.delete_session(&1).await);
        assert_eq!(*released.lock().unwrap(), vec![42]);
        assert!(store.get_session(&1).await.is_none());
    }

    #[tokio::test]
    async fn test_credentials_encrypted_at_rest() {
        let (store, _) = store();
        store
            .create_session(7, SessionFields::new().login("alice").password("hunter2"))
            .await
            .unwrap();

        {
            let sessions = store.inner.sessions.lock().await;
            let stored = sessions.get(&7).unwrap();
            assert!(!stored.login.is_empty());
            assert_ne!(stored.login, "alice");
            assert_ne!(stored.password, "hunter2");
        }

        let session = store.get_session(&7).await.unwrap();
        assert_eq!(session.login, "alice");
        assert_eq!(session.password, "hunter2");
        assert!(!format!("{:?}", session).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_duplicate_login_rejected() {
        let (store, released) = store();
        let first = SessionFields::new().login("a").password("p").handle(1);
        assert!(store.create_session(5, first).await.unwrap());
        let before = store.get_session(&5).await.unwrap();

        let second = SessionFields::new().login("b").password("q").handle(2);
        assert!(!store.create_session(5, second).await.unwrap());

        let after = store.get_session(&5).await.unwrap();
        assert_eq!(after.login, "a");
        assert_eq!(after.password, "p");
        assert_eq!(after.handle, Some(1));
        assert_eq!(after.created_at, before.created_at);
        assert!(released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mid_login_session_is_overwritten() {
        let (store, _) = store();
        store
            .create_session(5, SessionFields::new().login("typo"))
            .await
            .unwrap();
        assert!(store
            .create_session(5, SessionFields::new().login("fixed"))
            .await
            .unwrap());
        assert_eq!(store.get_session(&5).await.unwrap().login, "fixed");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_only_supplied_fields() {
        let (store, released) = store();
        store
            .create_session(3, SessionFields::new().login("a"))
            .await
            .unwrap();

        store
            .update_session_data(&3, SessionFields::new().password("secret"))
            .await
            .unwrap();
        let session = store.get_session(&3).await.unwrap();
        assert_eq!(session.login, "a");
        assert_eq!(session.password, "secret");

        store
            .update_session_data(&3, SessionFields::new().handle(9))
            .await
            .unwrap();
        // Same handle again is not a replacement
        store
            .update_session_data(&3, SessionFields::new().handle(9))
            .await
            .unwrap();
        assert_eq!(store.get_session(&3).await.unwrap().handle, Some(9));
        assert!(released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replaced_handle_is_released() {
        let (store, released) = store();
        store
            .create_session(3, SessionFields::new().login("a").handle(1))
            .await
            .unwrap();

        store.update_resource_handle(&3, 2).await;
        assert_eq!(*released.lock().unwrap(), vec![1]);
        assert_eq!(store.get_session(&3).await.unwrap().handle, Some(2));
    }

    #[tokio::test]
    async fn test_updates_without_session_are_noops() {
        let (store, released) = store();
        store
            .update_session_data(&8, SessionFields::new().login("x").handle(1))
            .await
            .unwrap();
        assert!(!store.update_resource_handle(&8, 2).await);

        assert!(store.is_empty().await);
        assert!(!store.contains(&8).await);
        assert!(released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, released) = store();
        assert!(!store.delete_session(&1).await);

        store
            .create_session(1, SessionFields::new().login("a"))
            .await
            .unwrap();
        assert!(store.delete_session(&1).await);
        assert!(!store.delete_session(&1).await);
        // No handle, nothing to release
        assert!(released.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delete_releases_once() {
        let (store, released) = store();
        store
            .create_session(1, SessionFields::new().login("a").handle(77))
            .await
            .unwrap();

        let deletes: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.delete_session(&1).await })
            })
            .collect();

        let mut removed = 0;
        for delete in deletes {
            if delete.await.unwrap() {
                removed += 1;
            }
        }

        assert_eq!(removed, 1);
        assert_eq!(*released.lock().unwrap(), vec![77]);
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        let cipher = CredentialCipher::new("store-tests").unwrap();
        let store: SessionStore<u64, u32> =
            SessionStore::new(StoreConfig::default(), cipher, failing_release);
        store
            .create_session(1, SessionFields::new().login("a").handle(1))
            .await
            .unwrap();

        assert!(store.delete_session(&1).await);
        assert!(!store.contains(&1).await);
    }

    #[tokio::test]
    async fn test_release_panic_is_contained() {
        let cipher = CredentialCipher::new("store-tests").unwrap();
        let store: SessionStore<u64, u32> =
            SessionStore::new(StoreConfig::default(), cipher, crashing_release);
        store
            .create_session(1, SessionFields::new().handle(1))
            .await
            .unwrap();

        assert!(store.delete_session(&1).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_release_is_bounded() {
        let cipher = CredentialCipher::new("store-tests").unwrap();
        let config = StoreConfig::new().with_release_timeout(Duration::from_secs(1));
        let store: SessionStore<u64, u32> = SessionStore::new(config, cipher, |_handle: u32| {
            futures::future::pending::<Result<(), ReleaseError>>()
        });
        store
            .create_session(1, SessionFields::new().handle(1))
            .await
            .unwrap();
        store
            .create_session(2, SessionFields::new().login("b"))
            .await
            .unwrap();

        assert!(store.delete_session(&1).await);
        // Other users are not held up
        assert_eq!(store.get_session(&2).await.unwrap().login, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_idle_sessions() {
        let (store, released) = store();
        let threshold = store.config().idle_threshold;

        store
            .create_session(1, SessionFields::new().login("stale").handle(10))
            .await
            .unwrap();
        store
            .create_session(3, SessionFields::new().login("pending"))
            .await
            .unwrap();
        tokio::time::advance(threshold + Duration::from_secs(1)).await;
        store
            .create_session(2, SessionFields::new().login("fresh").handle(20))
            .await
            .unwrap();

        assert_eq!(store.sweep_idle_sessions().await, 2);
        assert!(!store.contains(&1).await);
        assert!(store.contains(&2).await);
        assert!(!store.contains(&3).await);
        assert_eq!(*released.lock().unwrap(), vec![10]);

        assert_eq!(store.sweep_idle_sessions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_prevents_eviction() {
        let (store, released) = store();
        let threshold = store.config().idle_threshold;
        store
            .create_session(1, SessionFields::new().login("a").handle(10))
            .await
            .unwrap();
        tokio::time::advance(threshold + Duration::from_secs(1)).await;

        assert!(store.get_session(&1).await.is_some());
        assert_eq!(store.sweep_idle_sessions().await, 0);
        assert!(store.contains(&1).await);
        assert!(released.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_boundary_is_exclusive() {
        let (store, _) = store();
        let threshold = store.config().idle_threshold;
        store
            .create_session(1, SessionFields::new().login("a"))
            .await
            .unwrap();

        tokio::time::advance(threshold).await;
        assert_eq!(store.sweep_idle_sessions().await, 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.sweep_idle_sessions().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_jump_does_not_evict() {
        let (store, _) = store();
        store
            .create_session(1, SessionFields::new().login("a"))
            .await
            .unwrap();

        // Wall clock stepped a day ahead, monotonic time barely moved
        store
            .inner
            .sessions
            .lock()
            .await
            .get_mut(&1)
            .unwrap()
            .last_activity = Utc::now() - chrono::Duration::days(1);

        assert_eq!(store.sweep_idle_sessions().await, 0);
        assert!(store.contains(&1).await);
    }

    #[tokio::test]
    async fn test_last_activity_never_moves_backwards() {
        let (store, _) = store();
        store
            .create_session(1, SessionFields::new().login("a"))
            .await
            .unwrap();

        let ahead = Utc::now() + chrono::Duration::minutes(5);
        store
            .inner
            .sessions
            .lock()
            .await
            .get_mut(&1)
            .unwrap()
            .last_activity = ahead;

        let session = store.get_session(&1).await.unwrap();
        assert_eq!(session.last_activity, ahead);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (store, released) = store();
        for user in 1..=3 {
            store
                .create_session(user, SessionFields::new().handle(user as u32 * 10))
                .await
                .unwrap();
        }
        store
            .create_session(4, SessionFields::new().login("pending"))
            .await
            .unwrap();

        assert_eq!(store.shutdown().await, 4);
        assert!(store.is_empty().await);

        let mut released = released.lock().unwrap().clone();
        released.sort();
        assert_eq!(released, vec![10, 20, 30]);
    }
}
