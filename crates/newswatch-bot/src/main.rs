//! newswatch - a chat bot that keeps users logged into a school news site.
//!
//! Messages arrive on stdin as `<user_id> <text>` lines and replies are
//! printed as `[user_id] reply`. Each logged-in user owns a remote browser on
//! a Selenium hub, tracked by the session store and closed on `/stop`, after an
//! hour of inactivity, or at shutdown.

mod bot;
mod commands;
mod settings;
mod webdriver;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use newswatch_core::{config, CredentialCipher, ReleaseError, SessionStore, StoreConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bot::Bot;
use commands::Message;
use settings::Settings;
use webdriver::{BrowserSession, WebDriverClient};

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines when dropped.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();
    info!("newswatch starting");

    let settings = Settings::from_env().context("Invalid bot settings")?;
    let store_config = StoreConfig::from_env().context("Invalid session store settings")?;
    let passphrase = config::cipher_passphrase(|var| std::env::var(var).ok())?;
    let cipher = CredentialCipher::new(&passphrase).context("Failed to derive credential key")?;

    let driver = WebDriverClient::new(settings.hub_url.as_str(), settings.login_url.as_str())
        .context("Failed to create WebDriver client")?;
    info!(hub = %driver.hub_url(), "Using Selenium hub");

    let releaser = {
        let driver = driver.clone();
        move |session: BrowserSession| {
            let driver = driver.clone();
            async move {
                driver
                    .close(&session)
                    .await
                    .map_err(|e| ReleaseError::new(e.to_string()))
            }
        }
    };
    let sessions = SessionStore::new(store_config, cipher, releaser);
    sessions.start_sweeper().await;

    let bot = Arc::new(Bot::new(sessions, driver));
    let result = tokio::select! {
        result = run(Arc::clone(&bot)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    let closed = bot.sessions().shutdown().await;
    info!(sessions = closed, "newswatch shutting down");
    result
}

/// Feed stdin lines to the bot until EOF, each message on its own task.
/// Waits for in-flight messages before returning.
async fn run(bot: Arc<Bot<WebDriverClient>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let Some(message) = Message::parse_line(&line) else {
                    // Never log the line itself: it may be a password
                    if !line.trim().is_empty() {
                        warn!("Ignoring malformed line, expected `<user_id> <text>`");
                    }
                    continue;
                };

                let bot = Arc::clone(&bot);
                tasks.spawn(async move {
                    let user = message.user;
                    let reply = bot.handle(message).await;
                    println!("[{}] {}", user, reply);
                });
            }
            Some(joined) = tasks.join_next() => log_join(joined),
        }
    }

    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
    Ok(())
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Message handler failed");
    }
}
