//! Chat Client Example
//!
//! Joins a topic on a Phoenix server, prints every `new_msg` broadcast and
//! sends each line typed on stdin as a `new_msg` push.
//!
//! Run with:
//! `RUST_LOG=phx_channels=debug cargo run -p phx-channels --example chat_client -- ws://localhost:4000/socket/websocket room:lobby`

use std::{collections::BTreeMap, io::BufRead, time::Duration};

use phx_channels::{Socket, SocketConfig};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:4000/socket/websocket".to_string());
    let topic = args.next().unwrap_or_else(|| "room:lobby".to_string());
    let user = std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string());

    let config = SocketConfig::new(url)
        .heartbeat_interval(Duration::from_secs(30))
        .reconnect_interval(Duration::from_secs(5));
    let socket = Socket::new(config)?;

    socket.on_open(|| info!("connected"));
    socket.on_close(|reason| warn!(reason, "disconnected"));
    socket.on_error(|error| warn!(error, "socket error"));

    let channel = socket.channel(topic.as_str(), json!({"user": user}));
    channel.on_event("new_msg", |payload, _| {
        let from = payload["user"].as_str().unwrap_or("?");
        let body = payload["body"].as_str().unwrap_or_default();
        println!("[{from}] {body}");
    });
    channel.on_error(|payload| warn!(%payload, "channel error"));

    // First open joins; later opens rejoin on their own.
    let joiner = channel.downgrade();
    socket.on_open(move || {
        let Some(channel) = joiner.upgrade() else {
            return;
        };
        if channel.joined_once() {
            return;
        }
        if let Ok(push) = channel.join() {
            push.on_receive("ok", |_| info!("joined"))
                .on_receive("error", |response| warn!(%response, "join rejected"));
        }
    });

    let mut params = BTreeMap::new();
    params.insert("vsn".to_string(), "2.0.0".to_string());
    socket.connect_with(params)?;

    let (lines_tx, mut lines_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = lines_rx.recv().await {
        if line.trim() == "/quit" {
            break;
        }
        let push = channel.push_event("new_msg", json!({"user": user, "body": line}));
        push.on_receive("error", |response| warn!(%response, "message rejected"));
        if let Err(err) = push.after(Duration::from_secs(10), || warn!("message not acknowledged")) {
            warn!(error = %err, "could not set timeout");
        }
    }

    channel.leave();
    tokio::time::sleep(Duration::from_millis(200)).await;
    socket.disconnect();
    Ok(())
}
