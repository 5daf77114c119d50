//! The session broker: one peer connection, one command in flight.

use cb_peer::PeerSession;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct BrokerState {
    session: PeerSession,
    connected: bool,
}

impl BrokerState {
    async fn ensure_connected(&mut self) -> crate::Result<()> {
        if self.connected && self.session.is_connected() {
            return Ok(());
        }

        match self.session.connect().await {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                self.connected = false;
                Err(e.into())
            }
        }
    }
}

/// Serializes all command traffic through one [`PeerSession`].
///
/// The peer handles one command at a time and cannot interleave requests on
/// the same connection, so every public operation here runs under a single
/// mutex. The cached connected flag is demoted on every observed failure:
/// the broker never reports connected after an error, and the next call
/// reconnects instead of reusing a socket presumed healthy.
pub struct SessionBroker {
    state: Mutex<BrokerState>,
}

impl SessionBroker {
    /// Wrap the session. The broker owns it exclusively from here on.
    pub fn new(session: PeerSession) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                session,
                connected: false,
            }),
        }
    }

    /// Lazily connect if the cached flag is down. Idempotent when healthy.
    pub async fn ensure_connected(&self) -> crate::Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_connected().await
    }

    /// True if the last exchange with the peer succeeded.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Send one command through the gate.
    ///
    /// Acquires the gate, verifies connectivity, forwards to the session,
    /// and demotes the connected flag on any failure before returning it.
    pub async fn send_command(
        &self,
        command_type: &str,
        params: Map<String, Value>,
    ) -> crate::Result<Map<String, Value>> {
        let mut state = self.state.lock().await;

        state.ensure_connected().await?;

        match state.session.send_command(command_type, params).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(command = command_type, error = %e, "Command failed; demoting connection");
                state.connected = false;
                Err(e.into())
            }
        }
    }

    /// Probe the peer with a no-op command under the gate.
    pub async fn is_alive(&self) -> bool {
        let mut state = self.state.lock().await;

        if state.ensure_connected().await.is_err() {
            return false;
        }

        let alive = state.session.is_alive().await;
        if !alive {
            debug!("Liveness probe failed; demoting connection");
            state.connected = false;
        }
        alive
    }

    /// Drop the connection and mark the broker disconnected.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.session.disconnect();
        state.connected = false;
    }
}
