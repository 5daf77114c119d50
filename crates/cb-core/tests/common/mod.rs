//! Stub peer process for dispatch tests.
//!
//! Speaks the real wire protocol: parse-delimited JSON requests, one
//! response per request. Command types select canned behaviors, and the
//! stub records the maximum number of simultaneously in-flight commands so
//! tests can assert the broker's serialization guarantee.

use cb_proto::{FrameDecoder, JsonFrameDecoder};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct StubPeer {
    pub addr: SocketAddr,
    max_in_flight: Arc<AtomicUsize>,
}

impl StubPeer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        {
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    tokio::spawn(serve_connection(
                        stream,
                        in_flight.clone(),
                        max_in_flight.clone(),
                    ));
                }
            });
        }

        Self {
            addr,
            max_in_flight,
        }
    }

    /// Highest number of commands ever being served at the same moment.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
) {
    let mut decoder = JsonFrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let request = loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    if let Some(value) = decoder.try_frame() {
                        break value;
                    }
                }
            }
        };

        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(current, Ordering::SeqCst);

        let keep_going = respond(&mut stream, &request).await;

        in_flight.fetch_sub(1, Ordering::SeqCst);
        if !keep_going {
            return;
        }
    }
}

/// Handle one request. Returns false to hang up the connection.
async fn respond(stream: &mut TcpStream, request: &Value) -> bool {
    let command = request["type"].as_str().unwrap_or("");
    match command {
        "ping" => {
            write_json(stream, json!({"status": "success", "result": {"pong": true}})).await
        }
        "get_scene_info" => {
            tokio::time::sleep(Duration::from_millis(20)).await;
            write_json(
                stream,
                json!({"status": "success", "result": {"name": "Scene", "object_count": 3}}),
            )
            .await
        }
        "unknown_command" => {
            write_json(
                stream,
                json!({"status": "error", "message": format!("unknown command: {}", command)}),
            )
            .await
        }
        "drop_connection" => {
            // A response torso, then a hard close.
            let _ = stream.write_all(br#"{"status": "succ"#).await;
            let _ = stream.flush().await;
            false
        }
        "slow" => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            write_json(stream, json!({"status": "success", "result": {}})).await
        }
        "hang" => {
            // Outlive any client deadline, then give up on the socket.
            tokio::time::sleep(Duration::from_secs(5)).await;
            false
        }
        _ => write_json(stream, json!({"status": "success", "result": {}})).await,
    }
}

async fn write_json(stream: &mut TcpStream, value: Value) -> bool {
    let bytes = serde_json::to_vec(&value).unwrap();
    stream.write_all(&bytes).await.is_ok() && stream.flush().await.is_ok()
}
