//! Socket configuration.

use std::{collections::BTreeMap, time::Duration};

use url::Url;

use crate::{callback::CallbackMode, error::PhxResult};

/// Configuration for a [`Socket`](crate::Socket).
#[derive(Clone, Debug)]
pub struct SocketConfig {
    // URL
    /// Endpoint URL, e.g. `ws://localhost:4000/socket/websocket`.
    pub url: String,

    // Heartbeat settings
    /// Interval between heartbeat frames. Zero disables heartbeats.
    pub heartbeat_interval: Duration,

    // Reconnection settings
    /// Fixed delay between reconnect attempts. There is no backoff and no cap.
    pub reconnect_interval: Duration,
    /// Whether a transport close starts the reconnect loop.
    pub reconnect_on_error: bool,

    // Callbacks
    /// How application callbacks are run.
    pub callback_mode: CallbackMode,

    // Transport
    /// Timeout for opening the WebSocket connection.
    pub connect_timeout: Duration,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            reconnect_on_error: true,
            callback_mode: CallbackMode::Spawn,
            connect_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl SocketConfig {
    /// Create a new configuration with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the reconnect interval.
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set whether to reconnect after the transport closes.
    #[must_use]
    pub fn reconnect_on_error(mut self, reconnect: bool) -> Self {
        self.reconnect_on_error = reconnect;
        self
    }

    /// Set the callback delivery mode.
    #[must_use]
    pub fn callback_mode(mut self, mode: CallbackMode) -> Self {
        self.callback_mode = mode;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum inbound frame size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        let url = Url::parse(&self.url).map_err(|e| format!("Invalid URL: {e}"))?;
        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(format!("Unsupported URL scheme: {}", url.scheme()));
        }
        if self.reconnect_interval.is_zero() {
            return Err("Reconnect interval must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.max_message_size == 0 {
            return Err("Max message size must be > 0".to_string());
        }
        Ok(())
    }

    /// Build the connection URL with `params` appended as query pairs.
    pub fn endpoint_url(&self, params: &BTreeMap<String, String>) -> PhxResult<Url> {
        let mut url = Url::parse(&self.url)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}
