// src/client.rs

use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::time::{sleep, timeout_at, Instant};

use crate::calls::{channel_key, CallRegistry};
use crate::config::ClientConfig;
use crate::handler::EventHandler;
use crate::request::reply_error;
use crate::socket::{TokioWebSocketTransportFactory, TransportError};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::{AcceptParams, BridgeParams, Call, CallDirection, CallState, DialParams, DialResult};

/// Upper bound on each handshake read. Covers a stalled server between the
/// socket opening and the registration ack.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_CEILING: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is closed")]
    Closed,
    #[error("connection lost")]
    ConnectionLost,
    #[error("command timed out")]
    Timeout,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Call-control client for the CM WebSocket interface.
///
/// One instance owns one connection. Commands may be issued from any number
/// of tasks concurrently; replies are correlated by request id. Lifecycle
/// events arrive through the [`EventHandler`] installed with
/// [`set_handler`](Client::set_handler).
pub struct Client {
    config: ClientConfig,
    transport_factory: Arc<dyn TransportFactory>,
    pub(crate) transport: Mutex<Option<Arc<dyn Transport>>>,

    pub(crate) calls: CallRegistry,
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
    subscribe_numbers: RwLock<Vec<String>>,

    // Pending replies keyed by request_id. A std mutex: never held across
    // an await, and command drop-guards must clear entries synchronously.
    pub(crate) pending: std::sync::Mutex<HashMap<String, oneshot::Sender<Option<Value>>>>,
    pub(crate) request_counter: AtomicU64,

    connected: AtomicBool,
    is_connecting: AtomicBool,
    done: AtomicBool,
    pub(crate) shutdown: Notify,
}

impl Client {
    /// Creates a client over the built-in WebSocket transport.
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Self::with_transport_factory(config, Arc::new(TokioWebSocketTransportFactory::new()))
    }

    /// Creates a client over a custom transport, e.g. an in-process test
    /// server.
    pub fn with_transport_factory(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscribe_numbers: RwLock::new(config.subscribe_numbers.clone()),
            config,
            transport_factory: factory,
            transport: Mutex::new(None),
            calls: CallRegistry::new(),
            handler: RwLock::new(None),
            pending: std::sync::Mutex::new(HashMap::new()),
            request_counter: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            done: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Installs the event handler. Call before [`connect`](Client::connect);
    /// events arriving without a handler are dropped.
    pub async fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write().await = Some(handler);
    }

    pub(crate) async fn handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.handler.read().await.clone()
    }

    /// Replaces the DID list sent at the next registration. For a live
    /// update use [`subscribe`](Client::subscribe).
    pub async fn set_subscribe_numbers(&self, numbers: Vec<String>) {
        *self.subscribe_numbers.write().await = numbers;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Snapshot of every call currently tracked.
    pub async fn active_calls(&self) -> Vec<Call> {
        self.calls.snapshot().await
    }

    /// Dials the CM server, performs the register handshake, and starts the
    /// read and keepalive loops. Fires `on_connected` with the session id.
    ///
    /// Returns a boxed future (rather than `async fn`) to break the
    /// `connect` <-> `reconnect_loop` opaque-type cycle: `reconnect_loop`
    /// awaits `connect`, and `connect`'s read loop eventually spawns
    /// `reconnect_loop`, which rustc cannot resolve auto traits for when
    /// both sides are compiler-inferred opaque types.
    pub fn connect<'a>(
        self: &'a Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ClientError>> + Send + 'a>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(ClientError::Closed);
            }
            if self.is_connecting.swap(true, Ordering::SeqCst) {
                return Err(ClientError::AlreadyConnected);
            }
            let _guard = scopeguard::guard((), |_| {
                self.is_connecting.store(false, Ordering::Relaxed);
            });
            if self.is_connected() {
                return Err(ClientError::AlreadyConnected);
            }

            let (transport, mut events) = self
                .transport_factory
                .connect(&self.config.ws_url)
                .await?;

            let session_id = match self.handshake(&transport, &mut events).await {
                Ok(session_id) => session_id,
                Err(e) => {
                    transport.disconnect().await;
                    return Err(e);
                }
            };

            // A close that raced the handshake wins.
            if self.is_closed() {
                transport.disconnect().await;
                return Err(ClientError::Closed);
            }

            *self.transport.lock().await = Some(transport.clone());
            self.connected.store(true, Ordering::SeqCst);
            info!(target: "Client", "Registered, session_id={session_id}");

            if let Some(handler) = self.handler().await {
                handler.on_connected(&session_id).await;
            }

            tokio::spawn(self.clone().read_loop(transport.clone(), events));
            tokio::spawn(self.clone().ping_loop(transport));

            Ok(())
        })
    }

    /// Strict connect ordering: server hello, register, registration ack.
    async fn handshake(
        &self,
        transport: &Arc<dyn Transport>,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<String, ClientError> {
        let hello = self.read_handshake_frame(transport, events).await?;
        if hello.get("status").and_then(Value::as_str) != Some("connected") {
            return Err(ClientError::Handshake(format!(
                "unexpected status: {:?}",
                hello.get("status")
            )));
        }
        let session_id = hello
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let mut register = Map::new();
        register.insert("action".into(), "register".into());
        register.insert("auth_token".into(), self.config.auth_token.clone().into());
        register.insert("client_id".into(), self.config.client_id.clone().into());
        register.insert("appid".into(), self.config.app_id.clone().into());
        let numbers = self.subscribe_numbers.read().await.clone();
        if !numbers.is_empty() {
            register.insert("subscribe_numbers".into(), numbers.into());
        }
        transport
            .send_text(Value::Object(register).to_string())
            .await?;

        let ack = self.read_handshake_frame(transport, events).await?;
        if ack.get("status").and_then(Value::as_str) != Some("registered") {
            let reason = ack
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("registration refused");
            return Err(ClientError::Handshake(reason.to_owned()));
        }

        Ok(session_id)
    }

    /// Reads the next text frame during the handshake, echoing pings and
    /// bounding the wait.
    async fn read_handshake_frame(
        &self,
        transport: &Arc<dyn Transport>,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<Value, ClientError> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let event = timeout_at(deadline, events.recv())
                .await
                .map_err(|_| ClientError::Handshake("timed out waiting for server".into()))?
                .ok_or(ClientError::ConnectionLost)?;
            match event {
                TransportEvent::TextReceived(text) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| ClientError::Handshake(format!("malformed frame: {e}")));
                }
                TransportEvent::PingReceived(payload) => {
                    transport.send_pong(payload).await?;
                }
                TransportEvent::Connected | TransportEvent::PongReceived => {}
                TransportEvent::Disconnected => return Err(ClientError::ConnectionLost),
            }
        }
    }

    /// Receives frames until the connection dies. Tagged frames resolve
    /// pending commands; everything else is dispatched as an event.
    pub(crate) async fn read_loop(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            if self.is_closed() {
                break;
            }
            let event = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                TransportEvent::TextReceived(text) => {
                    let frame: Value = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        // Unparseable frames are skipped.
                        Err(_) => continue,
                    };

                    let request_id = frame
                        .get("request_id")
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .map(str::to_owned);
                    let frame = match request_id {
                        Some(request_id) => {
                            match self.deliver_reply(&request_id, frame) {
                                // Reply without a waiter flows on as an event.
                                Some(frame) => frame,
                                None => continue,
                            }
                        }
                        None => frame,
                    };

                    self.handle_event(frame).await;
                }
                TransportEvent::PingReceived(payload) => {
                    // Echoed through the same serialized writer as all
                    // other frames.
                    if let Err(e) = transport.send_pong(payload).await {
                        debug!(target: "Client/Recv", "Pong failed: {e}");
                    }
                }
                TransportEvent::Connected | TransportEvent::PongReceived => {}
                TransportEvent::Disconnected => break,
            }
        }

        self.connection_lost().await;
    }

    /// Transition from connected to disconnected: unblock every waiter,
    /// notify the handler once, hand off to the reconnect loop.
    async fn connection_lost(self: &Arc<Self>) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.sweep_pending();

        if !was_connected || self.is_closed() {
            return;
        }

        warn!(target: "Client", "Connection lost, scheduling reconnect");
        if let Some(handler) = self.handler().await {
            handler.on_error(&ClientError::ConnectionLost).await;
        }

        tokio::spawn(self.clone().reconnect_loop());
    }

    /// Re-dials with exponential backoff until connected or closed. Call
    /// records survive the gap; pending commands were already swept.
    pub(crate) async fn reconnect_loop(self: Arc<Self>) {
        let mut backoff = RECONNECT_BACKOFF_INITIAL;

        loop {
            if self.is_closed() {
                return;
            }

            info!(target: "Client/Reconnect", "Reconnecting in {backoff:?}");
            tokio::select! {
                _ = sleep(backoff) => {}
                _ = self.shutdown.notified() => return,
            }
            if self.is_closed() {
                return;
            }

            match self.connect().await {
                Ok(()) => {
                    info!(target: "Client/Reconnect", "Reconnected");
                    return;
                }
                Err(e) => {
                    warn!(target: "Client/Reconnect", "Reconnect failed: {e}");
                    if let Some(handler) = self.handler().await {
                        handler.on_error(&e).await;
                    }
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_CEILING);
                }
            }
        }
    }

    /// Closes the connection and stops every loop. Idempotent. A closed
    /// client cannot be reconnected; create a new one.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.done.swap(true, Ordering::SeqCst) {
            info!(target: "Client", "Closing");
            self.shutdown.notify_waiters();
        }

        self.sweep_pending();

        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
    }

    // --- Command surface ---

    /// Places an outbound call and waits for the gateway's verdict.
    ///
    /// The call is tracked under `channel:uid` from the moment the frame is
    /// sent, so events that beat the reply still find it; the record moves
    /// under the durable callid once the reply assigns one.
    pub async fn dial(&self, params: DialParams) -> Result<DialResult, ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "outbound".into());
        frame.insert("to".into(), params.to.clone().into());
        frame.insert("from".into(), params.from.clone().into());
        frame.insert("channel".into(), params.channel.clone().into());
        frame.insert("uid".into(), params.uid.clone().into());
        frame.insert("token".into(), params.token.into());
        frame.insert("region".into(), params.region.into());
        frame.insert("timeout".into(), params.timeout.into());
        if let Some(sip) = params.sip {
            frame.insert("sip".into(), sip.into());
        }
        if let Some(sip_domain) = params.sip_domain {
            frame.insert("sip_domain".into(), sip_domain.into());
        }
        if let Some(appid) = params.appid.as_deref() {
            frame.insert("appid".into(), appid.into());
        } else if self.config.is_multi() {
            warn!(target: "Client/Send", "MULTI-mode dial without an appid");
        }

        let provisional_key = channel_key(&params.channel, &params.uid);
        self.calls
            .insert(
                &provisional_key,
                Call {
                    callid: String::new(),
                    state: CallState::Ringing,
                    direction: Some(CallDirection::Outbound),
                    from: params.from,
                    to: params.to,
                    channel: params.channel,
                    uid: params.uid,
                    appid: params.appid,
                },
            )
            .await;

        let reply = match self.send_command("outbound", frame).await {
            Ok(reply) => reply,
            Err(e) => {
                self.calls.remove(&provisional_key).await;
                return Err(e);
            }
        };
        if let Some(message) = reply_error(&reply) {
            self.calls.remove(&provisional_key).await;
            return Err(ClientError::Server(message));
        }

        let data = reply.get("data");
        let success = data
            .and_then(|d| d.get("success"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let callid = data
            .and_then(|d| d.get("callid"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        if callid.is_empty() {
            self.calls.remove(&provisional_key).await;
        } else {
            self.calls.promote(&provisional_key, &callid).await;
        }

        Ok(DialResult {
            success,
            callid,
            data: reply,
        })
    }

    /// Accepts an inbound call with Agora credentials.
    pub async fn accept(&self, callid: &str, creds: AcceptParams) -> Result<(), ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "accept".into());
        frame.insert("callid".into(), callid.into());
        frame.insert("token".into(), creds.token.into());
        frame.insert("channel".into(), creds.channel.into());
        frame.insert("uid".into(), creds.uid.into());
        if let Some(appid) = creds.appid.as_deref() {
            frame.insert("appid".into(), appid.into());
        } else if self.config.is_multi() {
            warn!(target: "Client/Send", "MULTI-mode accept for {callid} without an appid");
        }
        if let Some(webhook_url) = creds.webhook_url {
            frame.insert("webhook_url".into(), webhook_url.into());
        }
        if let Some(sdk_options) = creds.sdk_options {
            frame.insert("sdk_options".into(), sdk_options.into());
        }
        if let Some(audio_scenario) = creds.audio_scenario {
            frame.insert("audio_scenario".into(), audio_scenario.into());
        }

        self.send_checked("accept", frame).await?;

        // Later commands (send_dtmf, hangup, ...) echo the appid cached on
        // the record.
        if let Some(appid) = creds.appid.as_deref() {
            self.calls.set_appid(callid, appid).await;
        }
        Ok(())
    }

    /// Rejects an inbound call.
    pub async fn reject(&self, callid: &str, reason: &str) -> Result<(), ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "reject".into());
        frame.insert("callid".into(), callid.into());
        frame.insert("reason".into(), reason.into());
        self.send_checked("reject", frame).await
    }

    /// Bridges the call's audio into an Agora channel.
    pub async fn bridge(&self, callid: &str, creds: BridgeParams) -> Result<(), ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "bridge".into());
        frame.insert("callid".into(), callid.into());
        frame.insert("token".into(), creds.token.into());
        frame.insert("channel".into(), creds.channel.into());
        frame.insert("uid".into(), creds.uid.into());
        if let Some(appid) = creds.appid {
            frame.insert("appid".into(), appid.into());
        }
        if let Some(sdk_options) = creds.sdk_options {
            frame.insert("sdk_options".into(), sdk_options.into());
        }
        if let Some(audio_scenario) = creds.audio_scenario {
            frame.insert("audio_scenario".into(), audio_scenario.into());
        }
        self.send_checked("bridge", frame).await
    }

    /// Detaches the call's audio from its Agora channel.
    pub async fn unbridge(&self, callid: &str) -> Result<(), ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "unbridge".into());
        frame.insert("callid".into(), callid.into());
        if let Some(appid) = self.calls.appid(callid).await {
            frame.insert("appid".into(), appid.into());
        }
        self.send_checked("unbridge", frame).await
    }

    /// Ends a call. Outbound legs use `endcall`, everything else `hangup`.
    pub async fn hangup(&self, callid: &str) -> Result<(), ClientError> {
        let call = self.calls.get(callid).await;

        let action = match call.as_ref().and_then(|call| call.direction) {
            Some(CallDirection::Outbound) => "endcall",
            _ => "hangup",
        };

        let mut frame = Map::new();
        frame.insert("action".into(), action.into());
        frame.insert("callid".into(), callid.into());
        if let Some(appid) = call.as_ref().and_then(|call| call.appid.as_deref()) {
            frame.insert("appid".into(), appid.into());
        }

        self.send_checked(action, frame).await?;
        self.calls.remove(callid).await;
        Ok(())
    }

    /// Transfers the call to another destination. `leg` selects which side
    /// of the call moves, when the server supports it.
    pub async fn transfer(
        &self,
        callid: &str,
        destination: &str,
        leg: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "transfer".into());
        frame.insert("callid".into(), callid.into());
        frame.insert("destination".into(), destination.into());
        if let Some(leg) = leg {
            frame.insert("leg".into(), leg.into());
        }
        if let Some(appid) = self.calls.appid(callid).await {
            frame.insert("appid".into(), appid.into());
        }
        self.send_checked("transfer", frame).await
    }

    /// Sends DTMF digits on an active call.
    pub async fn send_dtmf(&self, callid: &str, digits: &str) -> Result<(), ClientError> {
        let mut frame = Map::new();
        frame.insert("action".into(), "send_dtmf".into());
        frame.insert("callid".into(), callid.into());
        frame.insert("digits".into(), digits.into());
        if let Some(appid) = self.calls.appid(callid).await {
            frame.insert("appid".into(), appid.into());
        }
        self.send_checked("send_dtmf", frame).await
    }

    /// Replaces the DID subscription list on the live connection. The list
    /// is retained and resent at registration after a reconnect.
    pub async fn subscribe(&self, numbers: Vec<String>) -> Result<(), ClientError> {
        *self.subscribe_numbers.write().await = numbers.clone();
        let mut frame = Map::new();
        frame.insert("action".into(), "subscribe".into());
        frame.insert("numbers".into(), numbers.into());
        self.send_checked("subscribe", frame).await
    }

    /// Sends a command whose reply only signals success or failure.
    async fn send_checked(
        &self,
        action: &str,
        frame: Map<String, Value>,
    ) -> Result<(), ClientError> {
        let reply = self.send_command(action, frame).await?;
        match reply_error(&reply) {
            Some(message) => Err(ClientError::Server(message)),
            None => Ok(()),
        }
    }
}
