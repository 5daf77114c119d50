//! The peer session: one TCP connection, one command in flight.

use crate::PeerError;
use cb_proto::{Command, FrameDecoder, JsonFrameDecoder, PeerResponse};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default per-command receive deadline.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the liveness probe reply.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Read buffer size per socket read.
const READ_CHUNK: usize = 8192;

/// Buffers at least this large that fail to frame before the deadline are
/// treated as oversized payloads and degraded instead of failed.
const SALVAGE_MIN_BYTES: usize = 256 * 1024;

/// A session toward the peer process.
///
/// Holds the socket handle between commands. The handle is `None` until
/// [`PeerSession::connect`] succeeds and is cleared again on any I/O
/// failure, so the next use reconnects from scratch.
#[derive(Debug)]
pub struct PeerSession {
    host: String,
    port: u16,
    session_token: String,
    stream: Option<TcpStream>,
    last_activity: Instant,
    recv_timeout: Duration,
}

impl PeerSession {
    /// Create a disconnected session toward `host:port`.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            session_token: uuid::Uuid::new_v4().to_string(),
            stream: None,
            last_activity: Instant::now(),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// Override the per-command receive deadline. Useful for command types
    /// with expected-large payloads.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// True while a socket handle is held. Says nothing about whether the
    /// peer is still responsive; see [`PeerSession::is_alive`].
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Time since the last successful exchange with the peer.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Connect to the peer. Idempotent if already connected.
    pub async fn connect(&mut self) -> crate::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                PeerError::Connection(format!("Timed out connecting to peer at {}", addr))
            })?
            .map_err(|e| {
                PeerError::Connection(format!("Failed to connect to peer at {}: {}", addr, e))
            })?;

        info!(addr = %addr, session = %self.session_token, "Connected to peer");
        self.stream = Some(stream);
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Release the socket unconditionally.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(session = %self.session_token, "Disconnected from peer");
        }
    }

    /// Send a lightweight no-op command and check for a reply within a
    /// short deadline. Doubles as a liveness probe and refreshes
    /// `last_activity`. Any failure invalidates the handle.
    pub async fn is_alive(&mut self) -> bool {
        match self.send_with_deadline(Command::ping(), PING_TIMEOUT).await {
            Ok(response) => response.is_pong(),
            Err(_) => false,
        }
    }

    /// Send a command and wait for the peer's reply.
    ///
    /// Connects lazily if needed. Returns the result map of a success
    /// reply; a peer-reported error status becomes [`PeerError::Command`]
    /// without invalidating the connection.
    pub async fn send_command(
        &mut self,
        command_type: &str,
        params: Map<String, Value>,
    ) -> crate::Result<Map<String, Value>> {
        let deadline = self.recv_timeout;
        let response = self
            .send_with_deadline(Command::new(command_type, params), deadline)
            .await?;

        response.into_result().map_err(|message| {
            warn!(command = command_type, error = %message, "Peer reported command error");
            PeerError::Command(message)
        })
    }

    async fn send_with_deadline(
        &mut self,
        command: Command,
        recv_timeout: Duration,
    ) -> crate::Result<PeerResponse> {
        self.connect().await?;

        // Composing from typed parts keeps the frame a well-formed JSON
        // object regardless of what the caller put in the params map.
        let frame = command
            .to_frame()
            .map_err(|e| PeerError::Protocol(format!("Failed to encode command: {}", e)))?;

        debug!(
            command = %command.command_type,
            bytes = frame.len(),
            "Sending command to peer"
        );

        if let Err(e) = self.write_frame(&frame).await {
            self.disconnect();
            return Err(e);
        }
        self.last_activity = Instant::now();

        let value = match self.read_response(recv_timeout).await {
            Ok(value) => value,
            Err(e) => {
                // The wire is in an unknown state after any receive failure.
                self.disconnect();
                return Err(e);
            }
        };
        self.last_activity = Instant::now();

        match PeerResponse::from_value(value) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.disconnect();
                Err(PeerError::Protocol(format!(
                    "Unexpected response shape: {}",
                    e
                )))
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> crate::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PeerError::Connection("Not connected to peer".to_string()))?;

        stream
            .write_all(frame)
            .await
            .map_err(|e| PeerError::Connection(format!("Failed to send command: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| PeerError::Connection(format!("Failed to flush command: {}", e)))
    }

    /// Read until the accumulated bytes frame as one JSON value, the peer
    /// closes the connection, or the deadline expires. Deadline expiry and
    /// early close both fall back to salvage before giving up.
    async fn read_response(&mut self, recv_timeout: Duration) -> crate::Result<Value> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PeerError::Connection("Not connected to peer".to_string()))?;

        let mut decoder = JsonFrameDecoder::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        let deadline = Instant::now() + recv_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Self::expire(&mut decoder, recv_timeout);
            }

            let read = match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
                Ok(read) => read,
                Err(_) => return Self::expire(&mut decoder, recv_timeout),
            };

            match read {
                Ok(0) => {
                    // Peer closed the connection.
                    if decoder.is_empty() {
                        return Err(PeerError::Connection(
                            "Connection closed before receiving any data".to_string(),
                        ));
                    }
                    if let Some(value) = decoder.try_frame() {
                        return Ok(value);
                    }
                    let buffered = decoder.buffered_len();
                    if let Some(value) = decoder.salvage() {
                        warn!(buffered, "Connection closed mid-response; salvaged a prefix");
                        return Ok(value);
                    }
                    return Err(PeerError::Protocol(format!(
                        "Connection closed mid-response with {} unparseable bytes",
                        buffered
                    )));
                }
                Ok(n) => {
                    decoder.feed(&chunk[..n]);
                    if let Some(value) = decoder.try_frame() {
                        debug!(bytes = n, "Received complete response");
                        return Ok(value);
                    }
                }
                Err(e) => {
                    return Err(PeerError::Connection(format!(
                        "Socket error while receiving response: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Deadline handling: salvage what arrived, degrade oversized payloads,
    /// fail the rest.
    fn expire(decoder: &mut JsonFrameDecoder, recv_timeout: Duration) -> crate::Result<Value> {
        if decoder.is_empty() {
            return Err(PeerError::Timeout(format!(
                "No response from peer within {:?}",
                recv_timeout
            )));
        }

        let buffered = decoder.buffered_len();
        if let Some(value) = decoder.salvage() {
            warn!(buffered, "Response deadline expired; salvaged a truncated prefix");
            return Ok(value);
        }

        if buffered >= SALVAGE_MIN_BYTES {
            warn!(
                buffered,
                "Oversized response did not frame before the deadline; degrading"
            );
            return serde_json::to_value(PeerResponse::truncated(buffered))
                .map_err(|e| PeerError::Protocol(format!("Failed to degrade response: {}", e)));
        }

        Err(PeerError::Protocol(format!(
            "Response never resolved to valid JSON within {:?} ({} bytes buffered)",
            recv_timeout, buffered
        )))
    }
}
