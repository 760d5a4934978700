use serde_json::Value;

/// Parameters for placing an outbound call.
#[derive(Debug, Clone, Default)]
pub struct DialParams {
    pub to: String,
    pub from: String,
    pub channel: String,
    pub uid: String,
    /// Agora RTC token for the bridged channel.
    pub token: String,
    pub region: String,
    /// Ring timeout in seconds, as a string, passed through to the gateway.
    pub timeout: String,
    /// Optional SIP host override for routing via a load balancer.
    pub sip: Option<String>,
    pub sip_domain: Option<String>,
    /// Required per call in MULTI mode, ignored otherwise.
    pub appid: Option<String>,
}

/// Outcome of a dial request.
#[derive(Debug, Clone)]
pub struct DialResult {
    pub success: bool,
    /// Durable call id, empty when the gateway declined the call.
    pub callid: String,
    /// The raw reply frame, for fields not modelled here.
    pub data: Value,
}

/// Credentials for accepting an inbound call.
#[derive(Debug, Clone, Default)]
pub struct AcceptParams {
    pub token: String,
    pub channel: String,
    pub uid: String,
    /// Required per call in MULTI mode, ignored otherwise.
    pub appid: Option<String>,
    pub webhook_url: Option<String>,
    pub sdk_options: Option<String>,
    pub audio_scenario: Option<String>,
}

/// Credentials for bridging an answered call into an Agora channel.
#[derive(Debug, Clone, Default)]
pub struct BridgeParams {
    pub token: String,
    pub channel: String,
    pub uid: String,
    pub appid: Option<String>,
    pub sdk_options: Option<String>,
    pub audio_scenario: Option<String>,
}
