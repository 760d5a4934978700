use std::time::Duration;

/// Upper bound on the WebSocket upgrade, matching the server's own dial
/// timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Rolling read deadline, reset by every inbound ping or pong. The 5 s
/// keepalive cadence keeps a healthy connection comfortably inside it.
pub const READ_DEADLINE: Duration = Duration::from_secs(10);

pub const EVENT_CHANNEL_CAPACITY: usize = 100;
