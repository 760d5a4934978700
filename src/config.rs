/// Sentinel application id that puts a client into multi-tenant mode.
///
/// A MULTI client must carry an explicit `appid` on every call-scoped
/// command: `dial` and `accept` take it from their parameter bundles, later
/// commands echo the appid cached on the call record. The client never
/// rejects a command for a missing appid; the server is the authority.
pub const MULTI_APPID: &str = "MULTI";

/// Connection settings for a [`Client`](crate::client::Client).
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Full CM WebSocket URL, e.g. `wss://sipcm.agora.io/v1/ws/events`.
    pub ws_url: String,
    /// Authorization token sent in the register frame.
    pub auth_token: String,
    /// Stable identifier for this client across sessions.
    pub client_id: String,
    /// Application id, or [`MULTI_APPID`] for multi-tenant mode.
    pub app_id: String,
    /// DID numbers to subscribe to at registration. Can be replaced later
    /// with [`Client::subscribe`](crate::client::Client::subscribe).
    pub subscribe_numbers: Vec<String>,
}

impl ClientConfig {
    pub fn new(
        ws_url: impl Into<String>,
        auth_token: impl Into<String>,
        client_id: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            auth_token: auth_token.into(),
            client_id: client_id.into(),
            app_id: app_id.into(),
            subscribe_numbers: Vec::new(),
        }
    }

    /// Whether this client runs in multi-tenant mode.
    pub fn is_multi(&self) -> bool {
        self.app_id == MULTI_APPID
    }
}
