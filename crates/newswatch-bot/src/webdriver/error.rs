use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebDriverError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("WebDriver command failed ({error}): {message}")]
    Command { error: String, message: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Login or password is incorrect")]
    LoginRejected,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// W3C error code for a selector that matched nothing
const NO_SUCH_ELEMENT: &str = "no such element";

impl WebDriverError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let cut = (0..=MAX_ERROR_BODY_LENGTH)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
        }
    }

    /// Build an error from a failed response. WebDriver puts
    /// `{"value": {"error", "message"}}` in error bodies; anything else is
    /// reported raw.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct Envelope {
            value: ErrorValue,
        }
        #[derive(serde::Deserialize)]
        struct ErrorValue {
            error: String,
            #[serde(default)]
            message: String,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(Envelope { value }) => WebDriverError::Command {
                error: value.error,
                message: Self::truncate_body(&value.message),
            },
            Err(_) => WebDriverError::InvalidResponse(format!(
                "Status {}: {}",
                status,
                Self::truncate_body(body)
            )),
        }
    }

    pub fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Command { error, .. } if error == NO_SUCH_ELEMENT)
    }
}
