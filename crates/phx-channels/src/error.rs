//! Error handling for the channels client.

use thiserror::Error;

/// The main result type used throughout the crate.
pub type PhxResult<T> = Result<T, PhxError>;

/// Errors surfaced to callers of the channels client.
///
/// Transport and decode failures that happen on the dispatch path are never
/// returned from there; they are logged and turned into `phx_error` /
/// close callbacks. The variants below reach a caller only when an API call
/// itself is misused or cannot be carried out.
#[derive(Error, Debug)]
pub enum PhxError {
    /// `join()` was called on a channel that has already been joined once.
    #[error("channel {topic} was already joined; join() may only be called once")]
    AlreadyJoined { topic: String },

    /// `after()` was called twice on the same push.
    #[error("push for event {event} already has a timeout handler")]
    TimeoutAlreadySet { event: String },

    /// An inbound frame could not be decoded into an envelope.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The transport is not open.
    #[error("transport is not connected")]
    NotConnected,

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },
}

impl From<url::ParseError> for PhxError {
    fn from(e: url::ParseError) -> Self {
        Self::Config {
            message: format!("invalid url: {e}"),
        }
    }
}

impl PhxError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by misuse of the API rather than by the
    /// network or the server.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyJoined { .. } | Self::TimeoutAlreadySet { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PhxError::config("Invalid URL");
        assert!(matches!(err, PhxError::Config { .. }));

        let err = PhxError::websocket("reset by peer");
        assert_eq!(err.to_string(), "WebSocket error: reset by peer");
    }

    #[test]
    fn test_usage_errors() {
        let joined = PhxError::AlreadyJoined {
            topic: "room:42".to_string(),
        };
        assert!(joined.is_usage_error());
        assert!(joined.to_string().contains("room:42"));

        let after = PhxError::TimeoutAlreadySet {
            event: "new_msg".to_string(),
        };
        assert!(after.is_usage_error());
        assert!(!PhxError::NotConnected.is_usage_error());
    }

    #[test]
    fn test_url_parse_error_maps_to_config() {
        let err: PhxError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, PhxError::Config { .. }));
    }
}
