//! WebDriver client for driving a browser on a remote Selenium hub.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::WebDriverError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Starting a browser on a busy hub can take a while.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// How long to wait for page elements and for the login to land
const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay between polls while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// W3C key under which element references are returned
const ELEMENT_KEY: &str = "element-6066-11e4-a23f-4f7a1f0b7c66";

/// Chrome flags for running inside a container
const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
];

// Login form on the news site
const LOGIN_POPUP_BUTTON: &str = "button.js--login-popup-open";
const LOGIN_FIELD: &str = "input[name='LoginForm[login]']";
const PASSWORD_FIELD: &str = "input[name='LoginForm[password]']";
const SUBMIT_BUTTON: &str = "[name='login-button']";

/// Text of the logout link, only present once logged in
const LOGOUT_MARKER: &str = "Вийти";

/// Path segment of the personal cabinet the site redirects to after login
const CABINET_MARKER: &str = "cabinet";

/// A browser session on the hub. This is the handle the session store owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSession(String);

impl BrowserSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for BrowserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct NewSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// WebDriver client for one Selenium hub.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct WebDriverClient {
    client: Client,
    hub_url: String,
    login_url: String,
}

impl WebDriverClient {
    pub fn new(hub_url: impl Into<String>, login_url: impl Into<String>) -> Result<Self, WebDriverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            hub_url: hub_url.into().trim_end_matches('/').to_string(),
            login_url: login_url.into(),
        })
    }

    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// Send one WebDriver command and unwrap the `value` of its response.
    async fn command<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, WebDriverError> {
        let url = format!("{}{}", self.hub_url, path);
        debug!(%method, %url, "WebDriver command");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        decode(status, &text)
    }

    /// Start a new Chrome on the hub
    pub async fn new_session(&self) -> Result<BrowserSession, WebDriverError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": CHROME_ARGS }
                }
            }
        });
        let created: NewSessionResponse = self
            .command(Method::POST, "/session", Some(capabilities))
            .await?;
        debug!(session = %created.session_id, "Browser started");
        Ok(BrowserSession::new(created.session_id))
    }

    pub async fn navigate(&self, session: &BrowserSession, url: &str) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/session/{}/url", session),
            Some(json!({ "url": url })),
        )
        .await
    }

    pub async fn refresh(&self, session: &BrowserSession) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/session/{}/refresh", session),
            Some(json!({})),
        )
        .await
    }

    pub async fn current_url(&self, session: &BrowserSession) -> Result<String, WebDriverError> {
        self.command(Method::GET, &format!("/session/{}/url", session), None)
            .await
    }

    pub async fn page_source(&self, session: &BrowserSession) -> Result<String, WebDriverError> {
        self.command(Method::GET, &format!("/session/{}/source", session), None)
            .await
    }

    /// Shut the browser down. This is the release contract for the session store.
    pub async fn close(&self, session: &BrowserSession) -> Result<(), WebDriverError> {
        self.command::<()>(Method::DELETE, &format!("/session/{}", session), None)
            .await?;
        debug!(session = %session, "Browser closed");
        Ok(())
    }

    async fn find(&self, session: &BrowserSession, css: &str) -> Result<String, WebDriverError> {
        let element: Value = self
            .command(
                Method::POST,
                &format!("/session/{}/element", session),
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await?;

        element
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WebDriverError::InvalidResponse(format!("No element reference for {}", css)))
    }

    /// Poll for an element until it shows up or the wait times out
    async fn wait_for(&self, session: &BrowserSession, css: &str) -> Result<String, WebDriverError> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            match self.find(session, css).await {
                Err(e) if e.is_no_such_element() && Instant::now() < deadline => {
                    sleep(POLL_INTERVAL).await;
                }
                Err(e) if e.is_no_such_element() => {
                    return Err(WebDriverError::Timeout(css.to_string()))
                }
                result => return result,
            }
        }
    }

    async fn click(&self, session: &BrowserSession, element: &str) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/session/{}/element/{}/click", session, element),
            Some(json!({})),
        )
        .await
    }

    async fn send_keys(
        &self,
        session: &BrowserSession,
        element: &str,
        text: &str,
    ) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/session/{}/element/{}/value", session, element),
            Some(json!({ "text": text })),
        )
        .await
    }

    async fn is_logged_in(&self, session: &BrowserSession) -> Result<bool, WebDriverError> {
        if self.current_url(session).await?.contains(CABINET_MARKER) {
            return Ok(true);
        }
        Ok(self.page_source(session).await?.contains(LOGOUT_MARKER))
    }

    /// Start a browser and log into the news site with it.
    ///
    /// On any failure the browser is closed before the error is returned, so
    /// the caller only ever owns a session that is logged in.
    pub async fn log_in(&self, login: &str, password: &str) -> Result<BrowserSession, WebDriverError> {
        let session = self.new_session().await?;

        match self.submit_login(&session, login, password).await {
            Ok(()) => Ok(session),
            Err(e) => {
                if let Err(close_err) = self.close(&session).await {
                    warn!(session = %session, error = %close_err, "Failed to close browser after failed login");
                }
                Err(e)
            }
        }
    }

    async fn submit_login(
        &self,
        session: &BrowserSession,
        login: &str,
        password: &str,
    ) -> Result<(), WebDriverError> {
        self.navigate(session, &self.login_url).await?;

        let popup = self.wait_for(session, LOGIN_POPUP_BUTTON).await?;
        self.click(session, &popup).await?;

        let login_field = self.wait_for(session, LOGIN_FIELD).await?;
        self.send_keys(session, &login_field, login).await?;
        let password_field = self.find(session, PASSWORD_FIELD).await?;
        self.send_keys(session, &password_field, password).await?;
        let submit = self.find(session, SUBMIT_BUTTON).await?;
        self.click(session, &submit).await?;

        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.is_logged_in(session).await? {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
        Err(WebDriverError::LoginRejected)
    }
}

/// Unwrap the `value` of a WebDriver response body.
fn decode<T: DeserializeOwned>(status: StatusCode, text: &str) -> Result<T, WebDriverError> {
    if !status.is_success() {
        return Err(WebDriverError::from_status(status, text));
    }

    serde_json::from_str::<Envelope<T>>(text)
        .map(|e| e.value)
        .map_err(|e| WebDriverError::InvalidResponse(e.to_string()))
}
