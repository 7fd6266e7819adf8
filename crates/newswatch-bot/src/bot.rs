//! Chat conversation handling.
//!
//! The bot walks each user through `/start` → login → password, logs them
//! into the news site with a remote browser, and keeps the resulting session
//! in the shared `SessionStore`. Browser teardown goes through the store,
//! except for a browser the store never took ownership of.
//!
//! Messages from one user are handled in order; different users proceed
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use newswatch_core::{SessionFields, SessionStore};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::commands::{Command, Message, UserId};
use crate::webdriver::{BrowserSession, WebDriverClient, WebDriverError};

pub type Sessions = SessionStore<UserId, BrowserSession>;

/// What a browser has to do for the bot. Closing browsers held by sessions
/// belongs to the session store's release contract, not to this trait.
pub trait Browser: Send + Sync {
    /// Start a browser and log into the site, returning the logged-in session.
    fn sign_in<'a>(
        &'a self,
        login: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<BrowserSession, WebDriverError>>;

    /// Reload the current page.
    fn reload<'a>(&'a self, session: &'a BrowserSession) -> BoxFuture<'a, Result<(), WebDriverError>>;

    /// Close a browser that no session owns.
    fn discard<'a>(&'a self, session: &'a BrowserSession) -> BoxFuture<'a, Result<(), WebDriverError>>;
}

impl Browser for WebDriverClient {
    fn sign_in<'a>(
        &'a self,
        login: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<BrowserSession, WebDriverError>> {
        self.log_in(login, password).boxed()
    }

    fn reload<'a>(&'a self, session: &'a BrowserSession) -> BoxFuture<'a, Result<(), WebDriverError>> {
        self.refresh(session).boxed()
    }

    fn discard<'a>(&'a self, session: &'a BrowserSession) -> BoxFuture<'a, Result<(), WebDriverError>> {
        self.close(session).boxed()
    }
}

/// Where a user is in the login conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    AwaitingLogin,
    AwaitingPassword,
}

// ============================================================================
// Replies
// ============================================================================

pub const GREETING: &str = "👋 Welcome! Enter your login:";
pub const ASK_PASSWORD: &str = "🔐 Now enter your password:";
pub const LOGGED_IN: &str = "✅ Logged in! Use /refresh to reload the page.";
pub const ALREADY_LOGGED_IN: &str = "ℹ️ You are already logged in. Use /refresh, or /stop to log out.";
pub const NO_SESSION: &str = "❌ No active session. Use /start";
pub const REFRESHED: &str = "🔄 Page refreshed!";
pub const STOPPED: &str = "🛑 Session stopped and all data deleted";
pub const START_FIRST: &str = "Use /start to log in.";
pub const TRY_AGAIN: &str = "❌ Something went wrong, try /start again";

/// Per-user conversation state. Locked for the whole of a message so one
/// user's messages never interleave.
type Conversation = Arc<Mutex<Option<Step>>>;

/// Shared by every in-flight message; wrap it in an `Arc` to spawn handlers.
pub struct Bot<B> {
    sessions: Sessions,
    browser: B,
    conversations: Mutex<HashMap<UserId, Conversation>>,
}

impl<B: Browser> Bot<B> {
    pub fn new(sessions: Sessions, browser: B) -> Self {
        Self {
            sessions,
            browser,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    async fn conversation(&self, user: UserId) -> Conversation {
        let mut conversations = self.conversations.lock().await;
        Arc::clone(conversations.entry(user).or_default())
    }

    /// Handle one incoming message and return the reply to send.
    ///
    /// Waits for any earlier message from the same user to finish first.
    pub async fn handle(&self, message: Message) -> String {
        let user = message.user;
        // Free text may be a password, so only the kind of message is logged
        let kind = match &message.command {
            Command::Text(_) => "text",
            _ => "command",
        };
        debug!(user, kind, "Handling message");

        let conversation = self.conversation(user).await;
        let mut step = conversation.lock().await;

        match message.command {
            Command::Start => self.start(user, &mut step).await,
            Command::Refresh => self.refresh(user).await,
            Command::Stop => self.stop(user, &mut step).await,
            Command::Unknown(text) => format!("Unknown command {}. {}", text, START_FIRST),
            Command::Text(text) => match step.take() {
                Some(Step::AwaitingLogin) => self.receive_login(user, text, &mut step).await,
                Some(Step::AwaitingPassword) => self.receive_password(user, text).await,
                None => START_FIRST.to_string(),
            },
        }
    }

    async fn start(&self, user: UserId, step: &mut Option<Step>) -> String {
        if self.sessions.get_session(&user).await.is_some_and(|s| s.is_authenticated()) {
            return ALREADY_LOGGED_IN.to_string();
        }
        *step = Some(Step::AwaitingLogin);
        GREETING.to_string()
    }

    async fn receive_login(&self, user: UserId, login: String, step: &mut Option<Step>) -> String {
        match self
            .sessions
            .create_session(user, SessionFields::new().login(login))
            .await
        {
            Ok(true) => {
                *step = Some(Step::AwaitingPassword);
                ASK_PASSWORD.to_string()
            }
            Ok(false) => ALREADY_LOGGED_IN.to_string(),
            Err(e) => {
                error!(user, error = %e, "Failed to create session");
                TRY_AGAIN.to_string()
            }
        }
    }

    async fn receive_password(&self, user: UserId, password: String) -> String {
        if let Err(e) = self
            .sessions
            .update_session_data(&user, SessionFields::new().password(password))
            .await
        {
            error!(user, error = %e, "Failed to store password");
            self.sessions.delete_session(&user).await;
            return TRY_AGAIN.to_string();
        }

        // The session may have been swept or stopped while we waited for the password
        let Some(session) = self.sessions.get_session(&user).await else {
            return TRY_AGAIN.to_string();
        };

        match self.browser.sign_in(&session.login, &session.password).await {
            Ok(browser) => {
                // Swept while the browser was logging in; hand it to a fresh
                // session so the store still owns its release
                if !self.sessions.update_resource_handle(&user, browser.clone()).await
                    && !self.adopt(user, session.login, session.password, browser).await
                {
                    return TRY_AGAIN.to_string();
                }
                info!(user, "Login successful");
                LOGGED_IN.to_string()
            }
            Err(e) => {
                warn!(user, error = %e, "Login failed");
                self.sessions.delete_session(&user).await;
                format!("⚠️ Login failed: {}", e)
            }
        }
    }

    /// Store a logged-in browser in a new session for `user`. On failure the
    /// browser is closed here, as no session owns it.
    async fn adopt(
        &self,
        user: UserId,
        login: String,
        password: String,
        browser: BrowserSession,
    ) -> bool {
        let fields = SessionFields::new()
            .login(login)
            .password(password)
            .handle(browser.clone());
        if matches!(self.sessions.create_session(user, fields).await, Ok(true)) {
            return true;
        }

        error!(user, "Could not store browser after login");
        if let Err(e) = self.browser.discard(&browser).await {
            warn!(user, error = %e, "Failed to close unowned browser");
        }
        false
    }

    async fn refresh(&self, user: UserId) -> String {
        let Some(browser) = self.sessions.get_session(&user).await.and_then(|s| s.handle) else {
            return NO_SESSION.to_string();
        };

        match self.browser.reload(&browser).await {
            Ok(()) => REFRESHED.to_string(),
            Err(e) => {
                warn!(user, error = %e, "Refresh failed");
                format!("⚠️ Refresh failed: {}", e)
            }
        }
    }

    async fn stop(&self, user: UserId, step: &mut Option<Step>) -> String {
        *step = None;
        self.sessions.delete_session(&user).await;
        STOPPED.to_string()
    }
}
