use async_trait::async_trait;

use crate::client::ClientError;
use crate::types::Call;

/// Receives connection and call lifecycle callbacks from the client.
///
/// Callbacks are awaited serially from the read loop, so a slow handler
/// delays delivery of subsequent events. Awaiting a blocking command
/// (`accept`, `bridge`, ...) from inside a callback would stall the read
/// loop that must deliver its reply; spawn a task for such calls, as the
/// inbound demo does.
///
/// Every method has a no-op default, so implementations only override what
/// they care about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Registration completed. Fires again with a fresh session id after
    /// every successful reconnect.
    async fn on_connected(&self, _session_id: &str) {}

    /// An inbound call arrived on a subscribed number. Return `true` to
    /// claim it; the claimer is expected to `accept` or `reject` the call
    /// from a spawned task. Returning `false` discards the call
    /// immediately.
    async fn on_call_incoming(&self, _call: &Call) -> bool {
        false
    }

    async fn on_call_ringing(&self, _call: &Call) {}

    async fn on_call_answered(&self, _call: &Call) {}

    /// The call's audio has been bridged into the Agora channel.
    async fn on_bridge_start(&self, _call: &Call) {}

    async fn on_bridge_end(&self, _call: &Call) {}

    async fn on_call_hangup(&self, _call: &Call) {}

    /// DTMF digits received from the far end.
    async fn on_dtmf(&self, _call: &Call, _digits: &str) {}

    /// A transport or reconnect failure. Unless the client was closed, it
    /// keeps reconnecting in the background after this fires.
    async fn on_error(&self, _error: &ClientError) {}
}
