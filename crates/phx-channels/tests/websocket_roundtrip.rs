#![cfg(feature = "websocket")]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use phx_channels::{ChannelState, Socket, SocketConfig};
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

struct ServerState {
    conn_count: AtomicU64,
}

/// Minimal channels server: acknowledges joins, then broadcasts one message
/// on the joined topic and closes the connection when told to.
async fn start_test_server(state: Arc<ServerState>) -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            state.conn_count.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };

                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let topic = frame["topic"].clone();

                    match frame["event"].as_str() {
                        Some("phx_join") => {
                            let reply = json!({
                                "topic": topic,
                                "event": "phx_reply",
                                "payload": {"status": "ok", "response": {"joined": true}},
                                "ref": frame["ref"],
                            });
                            let broadcast = json!({
                                "topic": topic,
                                "event": "new_msg",
                                "payload": {"body": "welcome"},
                                "ref": null,
                            });
                            let _ = ws.send(Message::text(reply.to_string())).await;
                            let _ = ws.send(Message::text(broadcast.to_string())).await;
                        }
                        Some("shout") => {
                            let reply = json!({
                                "topic": topic,
                                "event": "phx_reply",
                                "payload": {"status": "ok", "response": frame["payload"]},
                                "ref": frame["ref"],
                            });
                            let _ = ws.send(Message::text(reply.to_string())).await;
                        }
                        Some("goodbye") => {
                            let _ = ws.close(None).await;
                            return;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    Ok(format!("ws://{addr}/socket/websocket"))
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("sender alive")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn websocket_join_broadcast_reply_and_close() {
    let state = Arc::new(ServerState {
        conn_count: AtomicU64::new(0),
    });
    let url = start_test_server(Arc::clone(&state)).await.unwrap();

    let config = SocketConfig::new(url)
        .heartbeat_interval(Duration::from_secs(30))
        .reconnect_on_error(false);
    let socket = Socket::new(config).unwrap();
    let channel = socket.channel("room:lobby", json!({"user": "alice"}));

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let events = tx.clone();
    channel.on_event("new_msg", move |payload, _| {
        let _ = events.send(format!("new_msg:{}", payload["body"]));
    });
    let events = tx.clone();
    socket.on_close(move |_| {
        let _ = events.send("closed".to_string());
    });
    let events = tx.clone();
    let joiner = channel.clone();
    socket.on_open(move || {
        let events = events.clone();
        if let Ok(push) = joiner.join() {
            push.on_receive("ok", move |response| {
                let _ = events.send(format!("joined:{response}"));
            });
        }
    });

    socket.connect().unwrap();

    let mut first_two = vec![next_event(&mut rx).await, next_event(&mut rx).await];
    first_two.sort();
    assert_eq!(
        first_two,
        vec![
            r#"joined:{"joined":true}"#.to_string(),
            r#"new_msg:"welcome""#.to_string(),
        ]
    );
    assert!(socket.is_connected());
    assert_eq!(channel.state(), ChannelState::Joined);

    let events = tx.clone();
    channel
        .push_event("shout", json!({"n": 7}))
        .on_receive("ok", move |response| {
            let _ = events.send(format!("shout:{response}"));
        });
    assert_eq!(next_event(&mut rx).await, r#"shout:{"n":7}"#);

    channel.push_event("goodbye", json!({}));
    assert_eq!(next_event(&mut rx).await, "closed");
    assert!(!socket.is_connected());
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(state.conn_count.load(Ordering::Relaxed), 1);

    socket.disconnect();
}
