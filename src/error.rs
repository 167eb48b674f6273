//! Error types for the chatwire engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Non-success status from the model server. The body is kept for
    /// logging only; it never reaches the wire (see [`Error::user_message`]).
    #[error("API error {status}")]
    Api { status: u16, body: String },

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Error::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Transient: transport failures, timeouts, interrupted streams,
    /// upstream rate limiting (429), and 5xx statuses. Everything else
    /// (bad credentials, bad configuration, malformed payloads) fails the
    /// same way every time, so the retry policy gives up immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout | Error::Stream(_) => true,
            Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Sanitized, user-actionable message for the wire `error` event.
    ///
    /// Raw provider payloads (response bodies, reqwest error chains) stay in
    /// the logs; the client only ever sees one of these fixed messages.
    pub fn user_message(&self) -> String {
        match self {
            Error::Http(_) | Error::Timeout => {
                "The model server could not be reached. Check that it is running \
                 and that the configured base URL is correct."
                    .to_string()
            }
            Error::Api { status, .. } => match status {
                401 | 403 => "The model server rejected the configured credentials. \
                              Check the API key."
                    .to_string(),
                429 => "The model server is rate limiting requests. Wait a moment \
                        and try again."
                    .to_string(),
                500..=599 => "The model server reported an internal error. Try again \
                              shortly."
                    .to_string(),
                _ => format!("The model server rejected the request (status {}).", status),
            },
            Error::Stream(_) | Error::Json(_) => {
                "The model response stream ended unexpectedly. Try again.".to_string()
            }
            Error::Config(msg) | Error::InvalidInput(msg) => msg.clone(),
            Error::Tool(_) => "A tool failed while handling the request.".to_string(),
            Error::Other(_) => "The request could not be completed.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api(500, "Internal Server Error");
        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert_eq!(err.to_string(), "API error 500");
    }

    #[test]
    fn test_error_stream() {
        let err = Error::stream("Connection lost");
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(err.to_string(), "Streaming error: Connection lost");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool execution error: Tool not found");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::timeout().is_transient());
        assert!(Error::stream("connection reset").is_transient());
        assert!(Error::api(500, "Internal Server Error").is_transient());
        assert!(Error::api(503, "Service Unavailable").is_transient());
        assert!(Error::api(429, "Too Many Requests").is_transient());
        assert!(!Error::api(401, "Unauthorized").is_transient());
        assert!(!Error::api(400, "Bad Request").is_transient());
        assert!(!Error::config("bad base_url").is_transient());
        assert!(!Error::invalid_input("missing field").is_transient());
        assert!(!Error::tool("handler bug").is_transient());
    }

    #[test]
    fn test_user_message_hides_api_body() {
        let err = Error::api(500, "secret stack trace from the provider");
        let msg = err.user_message();
        assert!(!msg.contains("secret"));
        assert!(msg.contains("internal error"));
    }

    #[test]
    fn test_user_message_credentials() {
        assert!(Error::api(401, "").user_message().contains("API key"));
        assert!(Error::api(403, "").user_message().contains("API key"));
    }

    #[test]
    fn test_user_message_rate_limit() {
        assert!(Error::api(429, "").user_message().contains("rate limiting"));
    }

    #[test]
    fn test_user_message_keeps_config_text() {
        let err = Error::config("model is required");
        assert_eq!(err.user_message(), "model is required");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }
}
