use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};

use super::consts::{CONNECT_TIMEOUT, EVENT_CHANNEL_CAPACITY, READ_DEADLINE};
use super::error::{Result, TransportError};
use crate::transport::{Transport, TransportEvent, TransportFactory};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// WebSocket transport backed by tokio-websockets.
///
/// Every outgoing frame, text and control alike, passes through the sink
/// mutex: split sinks do not tolerate concurrent writers.
pub struct TokioWebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
        }
    }

    async fn send_message(&self, msg: Message) -> Result<()> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(TransportError::SocketClosed)?;
        sink.send(msg).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        trace!(target: "Transport", "--> Sending text frame: {} bytes", text.len());
        self.send_message(Message::text(text)).await
    }

    async fn send_ping(&self) -> Result<()> {
        self.send_message(Message::ping(Bytes::new())).await
    }

    async fn send_pong(&self, payload: Bytes) -> Result<()> {
        self.send_message(Message::pong(payload)).await
    }

    async fn disconnect(&self) {
        *self.ws_sink.lock().await = None;
    }
}

/// Factory for creating tokio-websockets transports.
#[derive(Default)]
pub struct TokioWebSocketTransportFactory;

impl TokioWebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
            debug!(target: "Transport", "rustls crypto provider install: {e:?}");
        }

        info!(target: "Transport", "Dialing {url}");
        let uri: http::Uri = url
            .parse()
            .map_err(|e| TransportError::InvalidUrl(format!("{e}")))?;

        let (client, _response) = timeout(CONNECT_TIMEOUT, ClientBuilder::from_uri(uri).connect())
            .await
            .map_err(|_| TransportError::ConnectFailed("websocket upgrade timed out".into()))??;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(TokioWebSocketTransport::new(sink));

        tokio::task::spawn(read_pump(stream, event_tx.clone()));

        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    // Read deadline, rolled forward by ping/pong traffic only. Both peers
    // ping every 5 seconds, so a healthy connection never trips it.
    let mut deadline = Instant::now() + READ_DEADLINE;

    loop {
        let msg = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                warn!(target: "Transport", "Read deadline exceeded, closing");
                break;
            }
            Ok(None) => {
                trace!(target: "Transport", "Websocket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                error!(target: "Transport", "Error reading from websocket: {e}");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let event = if msg.is_text() {
            match msg.as_text() {
                Some(text) => {
                    debug!(target: "Transport", "<-- Received text frame: {} bytes", text.len());
                    TransportEvent::TextReceived(text.to_owned())
                }
                None => continue,
            }
        } else if msg.is_ping() {
            deadline = Instant::now() + READ_DEADLINE;
            TransportEvent::PingReceived(Bytes::copy_from_slice(msg.as_payload()))
        } else if msg.is_pong() {
            deadline = Instant::now() + READ_DEADLINE;
            TransportEvent::PongReceived
        } else if msg.is_close() {
            trace!(target: "Transport", "Received close frame");
            break;
        } else {
            continue;
        };

        if event_tx.send(event).await.is_err() {
            warn!(target: "Transport", "Event receiver dropped, closing read pump");
            break;
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
