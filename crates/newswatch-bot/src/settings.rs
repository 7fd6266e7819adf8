//! Bot settings, read from the environment (and `.env`, if present).
//!
//! The session store's own settings live in `newswatch_core::StoreConfig`;
//! this covers only what the bot needs to reach the browser hub.

use anyhow::{anyhow, Context, Result};

const ENV_SELENIUM_HOST: &str = "SELENIUM_HOST";
const ENV_SELENIUM_PORT: &str = "SELENIUM_PORT";
const ENV_LOGIN_URL: &str = "NEWSWATCH_LOGIN_URL";

/// Default Selenium hub port
const DEFAULT_SELENIUM_PORT: u16 = 4444;

/// Page the browser opens to log in
const DEFAULT_LOGIN_URL: &str = "https://nz.ua/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub hub_url: String,
    pub login_url: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup(ENV_SELENIUM_HOST)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("{} is not set", ENV_SELENIUM_HOST))?;

        let port = match lookup(ENV_SELENIUM_PORT) {
            Some(port) => port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("{} is not a valid port: {:?}", ENV_SELENIUM_PORT, port))?,
            None => DEFAULT_SELENIUM_PORT,
        };

        Ok(Self {
            hub_url: format!("http://{}:{}/wd/hub", host, port),
            login_url: lookup(ENV_LOGIN_URL).unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string()),
        })
    }
}
