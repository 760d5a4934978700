use serde::{Deserialize, Serialize};

/// Lifecycle state of a SIP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Incoming,
    Ringing,
    Answered,
    Bridged,
    Unbridged,
    Hangup,
}

/// Direction of a call relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outbound,
    OutboundSip,
    Inbound,
}

impl CallDirection {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "outbound" => Some(Self::Outbound),
            "outbound_sip" => Some(Self::OutboundSip),
            "inbound" => Some(Self::Inbound),
            _ => None,
        }
    }
}

/// A SIP call tracked by the client.
///
/// Snapshots of this record are handed to [`EventHandler`] callbacks; the
/// registry keeps the live copy.
///
/// [`EventHandler`]: crate::handler::EventHandler
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    /// Server-assigned call id. Empty for an outbound call whose dial reply
    /// has not arrived yet.
    pub callid: String,
    pub state: CallState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<CallDirection>,
    pub from: String,
    pub to: String,
    /// Agora RTC channel the call is (to be) bridged into.
    pub channel: String,
    /// Agora user id of the call's leg in the channel.
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,
}
