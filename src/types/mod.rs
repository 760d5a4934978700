pub mod call;
pub mod params;

pub use call::{Call, CallDirection, CallState};
pub use params::{AcceptParams, BridgeParams, DialParams, DialResult};
