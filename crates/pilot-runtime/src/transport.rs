//! WebSocket transport to the browser's remote debugging endpoint.
//!
//! The transport owns the raw socket. Outgoing frames are written through
//! [`TransportSender`]; incoming frames are parsed into JSON values and pushed
//! onto an unbounded channel consumed by the connection's dispatch loop. When
//! the socket closes or errors, the channel sender is dropped, which the
//! connection observes as end-of-stream.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Write half of the transport.
pub struct TransportSender {
    sink: WsSink,
}

impl TransportSender {
    /// Serialize a JSON value and send it as a text frame.
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Transport(format!("websocket send failed: {e}")))
    }

    /// Close the underlying socket.
    pub async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| Error::Transport(format!("websocket close failed: {e}")))
    }
}

/// Connect to a debugging WebSocket endpoint and split it into a sender and
/// a channel of parsed incoming messages.
pub async fn connect(ws_url: &str) -> Result<(TransportSender, mpsc::UnboundedReceiver<Value>)> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| Error::ConnectionFailed {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;

    let (sink, stream) = ws_stream.split();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    tokio::spawn(read_loop(stream, message_tx));

    Ok((TransportSender { sink }, message_rx))
}

/// Discover the browser-level WebSocket debugger URL via the HTTP endpoint.
///
/// Flat session mode (`Target.attachToTarget { flatten: true }`) requires the
/// browser endpoint rather than a per-page one.
pub async fn discover_ws_url(host: &str, port: u16) -> Result<String> {
    let url = format!("http://{host}:{port}/json/version");
    let version: Value = reqwest::get(&url)
        .await
        .map_err(|e| Error::ConnectionFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?
        .json()
        .await
        .map_err(|e| Error::ConnectionFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    version
        .get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("{url} returned no webSocketDebuggerUrl")))
}

async fn read_loop(mut stream: SplitStream<WsStream>, message_tx: mpsc::UnboundedSender<Value>) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(target = "pilot.transport", error = %e, "websocket read error");
                break;
            }
        };

        let text = match frame {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Message::Close(_) => {
                tracing::debug!(target = "pilot.transport", "websocket closed by remote");
                break;
            }
            _ => continue,
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                if message_tx.send(value).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(target = "pilot.transport", error = %e, "non-JSON frame ignored");
            }
        }
    }
    // Dropping message_tx signals end-of-stream to the dispatch loop.
}
