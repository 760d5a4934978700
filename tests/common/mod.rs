#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use telephony::socket::TransportError;
use telephony::{
    Call, Client, ClientConfig, ClientError, EventHandler, Transport, TransportEvent,
    TransportFactory,
};

/// A frame the client wrote to the wire, as seen by the scripted server.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Value),
    Ping,
    Pong(Bytes),
}

/// Channel-backed transport; the paired [`MockServer`] plays the CM side.
pub struct MockTransport {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl MockTransport {
    fn send(&self, frame: Outbound) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::SocketClosed);
        }
        self.outbound_tx
            .send(frame)
            .map_err(|_| TransportError::SocketClosed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let value: Value =
            serde_json::from_str(&text).expect("client always writes JSON objects");
        self.send(Outbound::Text(value))
    }

    async fn send_ping(&self) -> Result<(), TransportError> {
        self.send(Outbound::Ping)
    }

    async fn send_pong(&self, payload: Bytes) -> Result<(), TransportError> {
        self.send(Outbound::Pong(payload))
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// The server side of one mock connection.
pub struct MockServer {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl MockServer {
    /// Next text frame written by the client, skipping control frames.
    pub async fn expect_text(&mut self) -> Value {
        loop {
            match self.outbound.recv().await.expect("client hung up") {
                Outbound::Text(value) => return value,
                Outbound::Ping | Outbound::Pong(_) => continue,
            }
        }
    }

    /// Next wire frame of any kind.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Text frame already written by the client, if any.
    pub fn try_text(&mut self) -> Option<Value> {
        loop {
            match self.outbound.try_recv() {
                Ok(Outbound::Text(value)) => return Some(value),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub async fn push_text(&self, value: Value) {
        self.events_tx
            .send(TransportEvent::TextReceived(value.to_string()))
            .await
            .expect("client dropped its event stream");
    }

    pub async fn push_event(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Severs the connection from the server side.
    pub async fn drop_connection(&self) {
        let _ = self.events_tx.send(TransportEvent::Disconnected).await;
    }

    /// Plays the hello/register/registered exchange; returns the register
    /// frame the client sent.
    pub async fn complete_handshake(&mut self, session_id: &str) -> Value {
        self.push_text(json!({"status": "connected", "session_id": session_id}))
            .await;
        let register = self.expect_text().await;
        assert_eq!(register["action"], "register");
        self.push_text(json!({"status": "registered"})).await;
        register
    }
}

/// Hands the server half of each new connection to the test, one per
/// connect attempt (including reconnects).
pub struct MockTransportFactory {
    servers_tx: mpsc::UnboundedSender<MockServer>,
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(100);

        let _ = events_tx.send(TransportEvent::Connected).await;
        let server = MockServer {
            outbound: outbound_rx,
            events_tx,
        };
        self.servers_tx
            .send(server)
            .map_err(|_| TransportError::ConnectFailed("test dropped the server channel".into()))?;

        let transport = Arc::new(MockTransport {
            outbound_tx,
            closed: AtomicBool::new(false),
        });
        Ok((transport, events_rx))
    }
}

pub fn mock_factory() -> (Arc<MockTransportFactory>, mpsc::UnboundedReceiver<MockServer>) {
    let (servers_tx, servers_rx) = mpsc::unbounded_channel();
    (Arc::new(MockTransportFactory { servers_tx }), servers_rx)
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new(
        "wss://cm.test/v1/ws/events",
        "Basic test-token",
        "test-client",
        "app-1",
    )
}

/// Connects `client`, driving the handshake from the server side.
pub async fn connect_client(
    client: &Arc<Client>,
    servers: &mut mpsc::UnboundedReceiver<MockServer>,
) -> MockServer {
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut server = servers.recv().await.expect("factory not called");
    server.complete_handshake("session-1").await;
    connecting
        .await
        .expect("connect task panicked")
        .expect("handshake failed");
    server
}

/// Records every callback as a line on a channel; claims incoming calls
/// according to `claim`.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<String>,
    claim: bool,
}

impl RecordingHandler {
    pub fn new(claim: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, claim }), rx)
    }

    fn record(&self, line: String) {
        let _ = self.tx.send(line);
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_connected(&self, session_id: &str) {
        self.record(format!("connected:{session_id}"));
    }

    async fn on_call_incoming(&self, call: &Call) -> bool {
        self.record(format!("incoming:{}", call.callid));
        self.claim
    }

    async fn on_call_ringing(&self, call: &Call) {
        self.record(format!("ringing:{}", call.callid));
    }

    async fn on_call_answered(&self, call: &Call) {
        self.record(format!("answered:{}", call.callid));
    }

    async fn on_bridge_start(&self, call: &Call) {
        self.record(format!("bridge_start:{}", call.callid));
    }

    async fn on_bridge_end(&self, call: &Call) {
        self.record(format!("bridge_end:{}", call.callid));
    }

    async fn on_call_hangup(&self, call: &Call) {
        self.record(format!("hangup:{}", call.callid));
    }

    async fn on_dtmf(&self, call: &Call, digits: &str) {
        self.record(format!("dtmf:{}:{digits}", call.callid));
    }

    async fn on_error(&self, error: &ClientError) {
        self.record(format!("error:{error}"));
    }
}
