//! # phx-channels
//!
//! Client for the Phoenix channels protocol.
//!
//! One [`Socket`] multiplexes many topic-scoped [`Channel`]s over a single
//! duplex text transport. Outbound [`Push`]es are correlated with their
//! replies by ref; the socket keeps the connection alive with heartbeats and
//! reconnects at a fixed interval, rejoining every channel that was joined.
//!
//! ## Features
//!
//! - **Channels**: join, leave, per-event bindings, automatic rejoin
//! - **Reply correlation**: status hooks and a one-shot timeout per push
//! - **Supervision**: heartbeat, fixed-interval reconnect, lifecycle callbacks
//! - **Pluggable transport**: the [`Transport`] trait, with a `tokio-tungstenite`
//!   implementation behind the `websocket` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use phx_channels::{Socket, SocketConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket = Socket::new(SocketConfig::new("ws://localhost:4000/socket/websocket"))?;
//!     let channel = socket.channel("room:lobby", json!({"user": "alice"}));
//!
//!     channel.on_event("new_msg", |payload, _ref| println!("{payload}"));
//!
//!     // A strong `Channel` here would keep the socket alive forever.
//!     let joiner = channel.downgrade();
//!     socket.on_open(move || {
//!         if let Some(channel) = joiner.upgrade()
//!             && !channel.joined_once()
//!         {
//!             let _ = channel.join();
//!         }
//!     });
//!     socket.connect()?;
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     channel
//!         .push_event("new_msg", json!({"body": "hello"}))
//!         .on_receive("ok", |_| println!("delivered"))
//!         .after(Duration::from_secs(5), || eprintln!("no reply"))?;
//!
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     socket.disconnect();
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod push;
pub mod socket;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use callback::CallbackMode;
pub use channel::{Channel, WeakChannel};
pub use config::SocketConfig;
pub use error::{PhxError, PhxResult};
pub use protocol::{Envelope, Reply};
pub use push::Push;
pub use socket::Socket;
#[cfg(feature = "websocket")]
pub use transport::websocket::WebSocketTransport;
pub use transport::{Transport, TransportEvent, TransportSink};
pub use types::{ChannelId, ChannelState, ConnectionEpoch, Ref, SocketState, Topic};
