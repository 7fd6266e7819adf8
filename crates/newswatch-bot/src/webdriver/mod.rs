//! Minimal W3C WebDriver client for a remote Selenium hub.
//!
//! This module provides the `WebDriverClient` for starting a browser on the
//! hub, logging into the news site with it, reloading the page, and closing
//! the browser again. A `BrowserSession` is the handle the session store
//! keeps for each logged-in user.

pub mod client;
pub mod error;

pub use client::{BrowserSession, WebDriverClient};
pub use error::WebDriverError;
