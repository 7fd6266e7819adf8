//! Parsing of incoming console lines into chat messages.
//!
//! Each line stands in for one chat message: `<user_id> <text>`.

/// Chat identifier of a user, as the transport reports it.
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Refresh,
    Stop,
    /// A slash command the bot does not know
    Unknown(String),
    /// Free text, answering whatever the bot last asked
    Text(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Command::Text(text.to_string());
        };

        // Telegram-style "/start@botname" addressing
        let name = rest
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default();

        match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "refresh" => Command::Refresh,
            "stop" => Command::Stop,
            _ => Command::Unknown(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub user: UserId,
    pub command: Command,
}

impl Message {
    /// Parse a `<user_id> <text>` line. Blank or malformed lines give `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let (user, text) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let user = user.parse().ok()?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        Some(Self {
            user,
            command: Command::parse(text),
        })
    }
}
