//! Reconnectable client over [`Connection`] generations.
//!
//! The browser occasionally drops the debugging socket (tab crash, devtools
//! attach, browser restart). Rather than replaying in-flight commands, the
//! client replaces the connection wholesale: the stale generation fails every
//! pending command with a transport error, and a supervisor task establishes
//! a fresh generation after a short backoff. Callers that go through
//! [`Client::send`] never observe the swap beyond waiting for the new
//! generation to settle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::connection::{CdpEvent, Connection};
use crate::error::{Error, Result};
use crate::transport;

/// Delay before re-establishing a dropped connection.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(250);

/// Capacity of the event broadcast channel. Heap snapshot chunks arrive in
/// bursts, so this is sized generously.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Options for connecting to the browser's debugging endpoint.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 16666,
        }
    }
}

/// Handle to the browser's debugging endpoint that survives socket drops.
///
/// Event subscriptions are owned here, not by individual connections, so a
/// subscriber keeps receiving events across reconnects.
pub struct Client {
    /// Current connection generation. `None` while a reconnect is in flight.
    current: watch::Receiver<Option<Arc<Connection>>>,
    events_tx: broadcast::Sender<CdpEvent>,
}

impl Client {
    /// Connect to the browser and start the reconnect supervisor.
    pub async fn connect(options: ClientOptions) -> Result<Arc<Self>> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let ws_url = transport::discover_ws_url(&options.host, options.port).await?;
        let connection = Connection::open(&ws_url, 0, events_tx.clone()).await?;

        let (current_tx, current_rx) = watch::channel(Some(Arc::clone(&connection)));

        let client = Arc::new(Self {
            current: current_rx,
            events_tx: events_tx.clone(),
        });

        // The supervisor holds only the options, never the client itself, so
        // dropping the last client handle shuts the supervisor down instead
        // of keeping it alive forever.
        tokio::spawn(supervise(options, connection, current_tx, events_tx));

        Ok(client)
    }

    /// The current connection generation, waiting out any reconnect window.
    pub async fn connection(&self) -> Result<Arc<Connection>> {
        let mut current = self.current.clone();
        loop {
            if let Some(connection) = current.borrow().clone() {
                return Ok(connection);
            }
            current
                .changed()
                .await
                .map_err(|_| Error::Transport("client supervisor gone".to_string()))?;
        }
    }

    /// Send a command on the current generation.
    pub async fn send(&self, method: &str, params: serde_json::Value, session_id: Option<&str>) -> Result<serde_json::Value> {
        let connection = self.connection().await?;
        connection.send(method, params, session_id).await
    }

    /// Subscribe to protocol events. The subscription spans reconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events_tx.subscribe()
    }

    /// Close the current connection. The supervisor will treat this like any
    /// other drop and reconnect, so use this only when tearing the client
    /// down along with it.
    pub async fn close(&self) -> Result<()> {
        if let Some(connection) = self.current.borrow().clone() {
            connection.close();
        }
        Ok(())
    }
}

async fn supervise(
    options: ClientOptions,
    mut connection: Arc<Connection>,
    current_tx: watch::Sender<Option<Arc<Connection>>>,
    events_tx: broadcast::Sender<CdpEvent>,
) {
    loop {
        // `current_tx.closed()` resolves once every client handle is gone;
        // at that point the socket is closed and the task exits.
        tokio::select! {
            _ = connection.closed() => {}
            _ = current_tx.closed() => {
                connection.close();
                return;
            }
        }
        let stale_generation = connection.generation();

        // Callers racing the swap see `None` and wait rather than using the
        // dead handle.
        if current_tx.send(None).is_err() {
            return;
        }

        tracing::warn!(
            target = "pilot.client",
            generation = stale_generation,
            "connection lost, reconnecting"
        );

        tokio::time::sleep(RECONNECT_BACKOFF).await;

        loop {
            if current_tx.is_closed() {
                return;
            }

            let attempt = async {
                let ws_url = transport::discover_ws_url(&options.host, options.port).await?;
                Connection::open(&ws_url, stale_generation + 1, events_tx.clone()).await
            };

            match attempt.await {
                Ok(fresh) => {
                    connection = fresh;
                    break;
                }
                Err(e) => {
                    tracing::warn!(target = "pilot.client", error = %e, "reconnect attempt failed");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }

        if current_tx.send(Some(Arc::clone(&connection))).is_err() {
            return;
        }
    }
}
