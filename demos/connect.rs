//! Verifies that your credentials work by connecting to the CM WebSocket,
//! registering, and printing the session id.
//!
//! ```sh
//! export CM_HOST="wss://sipcm.agora.io"
//! export AUTH_TOKEN="Basic YOUR_TOKEN"
//! export APPID="your_appid"
//! cargo run --example connect
//! ```

use async_trait::async_trait;
use chrono::Local;
use log::{error, info};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use telephony::{Client, ClientConfig, ClientError, EventHandler};

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn on_connected(&self, session_id: &str) {
        info!("Connected: session={session_id}");
    }

    async fn on_error(&self, error: &ClientError) {
        error!("Error: {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cm_host = env_or_default("CM_HOST", "wss://sipcm.agora.io");
    let auth_token = require_env("AUTH_TOKEN")?;
    let app_id = require_env("APPID")?;

    let config = ClientConfig::new(
        format!("{cm_host}/v1/ws/events"),
        auth_token,
        format!("connect-demo-{}", unix_millis()),
        app_id,
    );
    let client = Client::new(config);
    client.set_handler(Arc::new(Handler)).await;

    info!("Connecting to {cm_host} ...");
    client.connect().await?;
    info!("OK, authenticated and registered successfully");

    client.close().await;
    Ok(())
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Required env var {key} is not set"))
}

fn env_or_default(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}
