use futures_util::FutureExt;
use log::{debug, error};
use serde::Deserialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;

use crate::client::Client;
use crate::types::CallState;

/// Contextual fields carried by CM lifecycle events. Absent and empty
/// fields are equivalent; neither overwrites tracked call state.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct EventFrame {
    pub event: Option<String>,
    pub callid: Option<String>,
    pub channel: Option<String>,
    pub uid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<String>,
    pub appid: Option<String>,
    pub digits: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Incoming,
    Ringing,
    Answered,
    BridgeStart,
    BridgeEnd,
    Hangup,
    Dtmf,
}

impl EventKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "call_incoming" => Some(Self::Incoming),
            "call_ringing" => Some(Self::Ringing),
            "call_answered" => Some(Self::Answered),
            "agora_bridge_start" => Some(Self::BridgeStart),
            "agora_bridge_end" => Some(Self::BridgeEnd),
            "call_hangup" => Some(Self::Hangup),
            "dtmf_received" => Some(Self::Dtmf),
            _ => None,
        }
    }

    /// State given to a record created by this event. DTMF only occurs on
    /// live calls, so an unknown callid starts out answered.
    pub(crate) fn initial_state(self) -> CallState {
        match self {
            Self::Incoming => CallState::Incoming,
            Self::Ringing => CallState::Ringing,
            Self::Answered => CallState::Answered,
            Self::BridgeStart => CallState::Bridged,
            Self::BridgeEnd => CallState::Unbridged,
            Self::Hangup => CallState::Hangup,
            Self::Dtmf => CallState::Answered,
        }
    }
}

impl Client {
    /// Routes one untagged frame: registry mutation under the write lock,
    /// then the handler callback with every lock released.
    pub(crate) async fn handle_event(&self, frame: Value) {
        let handler = match self.handler().await {
            Some(handler) => handler,
            None => return,
        };

        let frame: EventFrame = match serde_json::from_value(frame) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(target: "Client/Recv", "Dropping unparseable event: {e}");
                return;
            }
        };
        let kind = match frame.event.as_deref().and_then(EventKind::parse) {
            Some(kind) => kind,
            None => {
                debug!(target: "Client/Recv", "Ignoring unknown event {:?}", frame.event);
                return;
            }
        };

        let call = match self.calls.apply_event(kind, &frame).await {
            Some(call) => call,
            None => return,
        };
        debug!(
            target: "Client/Recv",
            "{:?} callid={} state={:?}", kind, call.callid, call.state
        );

        let dispatch = async {
            match kind {
                EventKind::Incoming => {
                    let claimed = handler.on_call_incoming(&call).await;
                    if !claimed {
                        self.calls.remove(&call.callid).await;
                    }
                }
                EventKind::Ringing => handler.on_call_ringing(&call).await,
                EventKind::Answered => handler.on_call_answered(&call).await,
                EventKind::BridgeStart => handler.on_bridge_start(&call).await,
                EventKind::BridgeEnd => handler.on_bridge_end(&call).await,
                EventKind::Hangup => handler.on_call_hangup(&call).await,
                EventKind::Dtmf => {
                    let digits = frame.digits.as_deref().unwrap_or("");
                    handler.on_dtmf(&call, digits).await;
                }
            }
        };

        // A panicking handler must not take down the read loop.
        if AssertUnwindSafe(dispatch).catch_unwind().await.is_err() {
            error!(target: "Client/Recv", "Event handler panicked, continuing");
        }
    }
}
