//! Core type definitions shared by the socket, channels and pushes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-connection message reference used to correlate a push with its reply.
///
/// Refs are handed out by [`Socket::make_ref`](crate::Socket::make_ref),
/// start at zero and are never reused by one socket, even across reconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(pub u64);

impl Ref {
    /// Get the numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Ref {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Topic identifier for channel routing, e.g. `room:42`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a new topic from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Key of a channel in its socket's registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generation counter of the transport owned by a socket.
///
/// Bumped every time the transport is (re)opened or torn down, so that
/// notifications from a transport that has since been replaced are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionEpoch(pub u64);

/// Connection state as tracked by the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SocketState {
    /// The transport is opening.
    Connecting,
    /// The transport is open and frames can be sent.
    Open,
    /// A close was requested and is in progress.
    Closing,
    /// No connection.
    #[default]
    Closed,
}

impl SocketState {
    /// Check if frames can be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Join state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Not joined. Every channel starts here.
    #[default]
    Closed,
    /// The socket reported an error; the supervisor's reconnect drives recovery.
    Errored,
    /// A join has been sent and no reply has arrived yet.
    Joining,
    /// The server acknowledged the join.
    Joined,
}

impl ChannelState {
    /// Returns true while a join is in flight or established.
    pub fn is_joining_or_joined(&self) -> bool {
        matches!(self, Self::Joining | Self::Joined)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Errored => "errored",
            Self::Joining => "joining",
            Self::Joined => "joined",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_display_and_serde() {
        let r = Ref(7);
        assert_eq!(r.to_string(), "7");
        assert_eq!(serde_json::to_string(&r).unwrap(), "7");
        assert_eq!(serde_json::from_str::<Ref>("12").unwrap(), Ref(12));
    }

    #[test]
    fn test_topic_creation() {
        let topic = Topic::new("room:42");
        assert_eq!(topic.as_str(), "room:42");
        assert_eq!(format!("{}", topic), "room:42");
    }

    #[test]
    fn test_topic_from_string() {
        let topic: Topic = String::from("rooms:lobby").into();
        assert_eq!(topic.as_str(), "rooms:lobby");
    }

    #[test]
    fn test_default_states() {
        assert_eq!(SocketState::default(), SocketState::Closed);
        assert_eq!(ChannelState::default(), ChannelState::Closed);
        assert!(SocketState::Open.is_open());
        assert!(!SocketState::Connecting.is_open());
    }

    #[test]
    fn test_channel_state_joining_or_joined() {
        assert!(ChannelState::Joining.is_joining_or_joined());
        assert!(ChannelState::Joined.is_joining_or_joined());
        assert!(!ChannelState::Closed.is_joining_or_joined());
        assert!(!ChannelState::Errored.is_joining_or_joined());
    }
}
