use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::client::Client;
use crate::transport::Transport;

/// Interval between client pings. The server rolls its read deadline on
/// every one, exactly as we roll ours on its pongs.
pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(5);

impl Client {
    /// Pings the transport every 5 seconds until the connection dies or the
    /// client shuts down. Spawned once per connection; a stale instance
    /// exits on its first failed ping after a reconnect.
    pub(crate) async fn ping_loop(self: Arc<Self>, transport: Arc<dyn Transport>) {
        loop {
            if self.is_closed() {
                return;
            }
            tokio::select! {
                _ = sleep(PING_INTERVAL) => {
                    if let Err(e) = transport.send_ping().await {
                        debug!(target: "Client/Keepalive", "Ping failed, exiting loop: {e}");
                        return;
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, exiting keepalive loop");
                    return;
                }
            }
        }
    }
}
