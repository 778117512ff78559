//! Command/response correlation layer on top of the transport.
//!
//! One [`Connection`] wraps one WebSocket to the browser. It handles:
//! - Generating unique command IDs
//! - Correlating responses with pending commands
//! - Fanning out protocol events to subscribers
//!
//! # Message flow
//!
//! 1. Caller invokes [`Connection::send`] with method, params and an optional
//!    session id
//! 2. The connection assigns an ID and registers a oneshot callback
//! 3. The serialized command goes to the writer task via an unbounded channel
//! 4. The dispatch loop receives the response from the transport and settles
//!    the callback by ID
//!
//! Messages carrying a `method` instead of an `id` are events; they are
//! broadcast to every subscriber. The broadcast sender is supplied by the
//! owning [`Client`](crate::client::Client) so that subscriptions survive
//! reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::transport::{self, TransportSender};

/// A protocol event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event method name, e.g. `Page.frameNavigated`.
    pub method: String,
    /// Session the event was emitted on, if any.
    pub session_id: Option<String>,
    /// Event parameters.
    pub params: Value,
}

/// Error object embedded in a command response.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpError {
    pub code: i64,
    pub message: String,
}

/// Pending command callbacks keyed by command ID. `None` once the connection
/// has been torn down, so late senders fail fast instead of queueing.
type CallbackMap = Mutex<Option<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

enum Outbound {
    Command(Value),
    Shutdown,
}

/// One generation of the connection to the browser.
///
/// Commands issued against a torn-down generation fail with
/// [`Error::ConnectionClosed`]; they are never replayed onto a newer one.
pub struct Connection {
    generation: u64,
    next_id: AtomicU64,
    callbacks: Arc<CallbackMap>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    events_tx: broadcast::Sender<CdpEvent>,
    closed_rx: watch::Receiver<bool>,
}

impl Connection {
    /// Open a WebSocket to `ws_url` and start the writer and dispatch tasks.
    ///
    /// `events_tx` receives every protocol event for the lifetime of this
    /// generation.
    pub async fn open(
        ws_url: &str,
        generation: u64,
        events_tx: broadcast::Sender<CdpEvent>,
    ) -> Result<Arc<Self>> {
        let (sender, message_rx) = transport::connect(ws_url).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let callbacks: Arc<CallbackMap> = Arc::new(Mutex::new(Some(HashMap::new())));

        tokio::spawn(write_loop(sender, outbound_rx));
        tokio::spawn(dispatch_loop(
            message_rx,
            Arc::clone(&callbacks),
            events_tx.clone(),
            closed_tx,
            generation,
        ));

        tracing::info!(target = "pilot.connection", url = ws_url, generation, "connected");

        Ok(Arc::new(Self {
            generation,
            next_id: AtomicU64::new(1),
            callbacks,
            outbound_tx,
            events_tx,
            closed_rx,
        }))
    }

    /// Generation tag of this connection. Incremented by the client on every
    /// reconnect.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send a command and await its response.
    ///
    /// The result value of the response is returned on success; a CDP-level
    /// error in the response surfaces as [`Error::Cdp`]. No timeout is imposed
    /// here; bounded waits live with the callers that need them.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut command = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session_id) = session_id {
            command["sessionId"] = Value::String(session_id.to_string());
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut callbacks = self.callbacks.lock();
            match callbacks.as_mut() {
                Some(map) => {
                    map.insert(id, tx);
                }
                None => {
                    return Err(Error::ConnectionClosed {
                        generation: self.generation,
                    });
                }
            }
        }

        tracing::debug!(target = "pilot.connection", id, method, "sending command");

        if self.outbound_tx.send(Outbound::Command(command)).is_err() {
            if let Some(map) = self.callbacks.lock().as_mut() {
                map.remove(&id);
            }
            return Err(Error::ConnectionClosed {
                generation: self.generation,
            });
        }

        rx.await.map_err(|_| Error::ConnectionClosed {
            generation: self.generation,
        })?
    }

    /// Subscribe to protocol events.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events_tx.subscribe()
    }

    /// True once the dispatch loop has terminated.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves when the underlying socket is gone.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Shutdown);
    }
}

async fn write_loop(mut sender: TransportSender, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(outbound) = outbound_rx.recv().await {
        match outbound {
            Outbound::Command(message) => {
                if let Err(e) = sender.send(message).await {
                    tracing::error!(target = "pilot.connection", error = %e, "transport write error");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = sender.close().await;
}

async fn dispatch_loop(
    mut message_rx: mpsc::UnboundedReceiver<Value>,
    callbacks: Arc<CallbackMap>,
    events_tx: broadcast::Sender<CdpEvent>,
    closed_tx: watch::Sender<bool>,
    generation: u64,
) {
    while let Some(message) = message_rx.recv().await {
        dispatch_message(message, &callbacks, &events_tx);
    }

    // Socket is gone: every in-flight command bound to this generation fails.
    let drained = callbacks.lock().take();
    if let Some(map) = drained {
        for (_, tx) in map {
            let _ = tx.send(Err(Error::ConnectionClosed { generation }));
        }
    }
    let _ = closed_tx.send(true);
    tracing::info!(target = "pilot.connection", generation, "connection closed");
}

/// Route one incoming message: responses settle their pending callback,
/// events go out on the broadcast channel.
fn dispatch_message(message: Value, callbacks: &CallbackMap, events_tx: &broadcast::Sender<CdpEvent>) {
    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let callback = callbacks.lock().as_mut().and_then(|map| map.remove(&id));
        let Some(callback) = callback else {
            tracing::debug!(target = "pilot.connection", id, "response for unknown command id");
            return;
        };

        let result = match message.get("error") {
            Some(error) => match serde_json::from_value::<CdpError>(error.clone()) {
                Ok(e) => Err(Error::Cdp {
                    code: e.code,
                    message: e.message,
                }),
                Err(_) => Err(Error::Protocol(format!("malformed error payload: {error}"))),
            },
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };

        let _ = callback.send(result);
    } else if let Some(method) = message.get("method").and_then(Value::as_str) {
        let event = CdpEvent {
            method: method.to_string(),
            session_id: message
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string),
            params: message.get("params").cloned().unwrap_or(Value::Null),
        };
        // No subscribers is fine; the event is simply dropped.
        let _ = events_tx.send(event);
    } else {
        tracing::debug!(target = "pilot.connection", "message with neither id nor method ignored");
    }
}
