//! Client SDK for the Agora call manager (CM) WebSocket interface.
//!
//! The CM controls SIP/PSTN calls and bridges their audio into Agora RTC
//! channels. This crate maintains the persistent, authenticated WebSocket
//! session to it: commands (`dial`, `accept`, `bridge`, ...) are correlated
//! with their replies by request id, call lifecycle events are dispatched to
//! an [`EventHandler`], and the connection heals itself with exponential
//! backoff while tracked calls survive the gap.
//!
//! ```no_run
//! use telephony::{Client, ClientConfig, DialParams};
//!
//! # async fn run() -> Result<(), telephony::ClientError> {
//! let config = ClientConfig::new(
//!     "wss://sipcm.agora.io/v1/ws/events",
//!     "Basic TOKEN",
//!     "my-client",
//!     "my-appid",
//! );
//! let client = Client::new(config);
//! client.connect().await?;
//!
//! let result = client
//!     .dial(DialParams {
//!         to: "+18005551234".into(),
//!         from: "+15551234567".into(),
//!         channel: "demo".into(),
//!         uid: "100".into(),
//!         token: "rtc-token".into(),
//!         region: "AREA_CODE_NA".into(),
//!         timeout: "60".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("callid: {}", result.callid);
//! # Ok(())
//! # }
//! ```

mod calls;
pub mod client;
pub mod config;
mod events;
pub mod handler;
mod keepalive;
mod request;
pub mod socket;
pub mod transport;
pub mod types;

pub use client::{Client, ClientError};
pub use config::{ClientConfig, MULTI_APPID};
pub use handler::EventHandler;
pub use transport::{Transport, TransportEvent, TransportFactory};
pub use types::{
    AcceptParams, BridgeParams, Call, CallDirection, CallState, DialParams, DialResult,
};
