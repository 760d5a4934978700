//! Subscribes to a DID (phone number) and waits for incoming calls. When a
//! call arrives it auto-accepts with Agora credentials and logs all
//! lifecycle events until hangup.
//!
//! ```sh
//! export CM_HOST="wss://sipcm.agora.io"
//! export AUTH_TOKEN="Basic YOUR_TOKEN"
//! export APPID="your_appid"
//! export DID="18005551234"
//! cargo run --example inbound
//! ```
//!
//! Then call the DID from a phone, or trigger a loopback by dialing it via
//! the outbound API.

use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use telephony::{AcceptParams, Call, Client, ClientConfig, ClientError, EventHandler};
use tokio::sync::mpsc;

struct Handler {
    client: OnceLock<Arc<Client>>,
    app_id: String,
    done_tx: mpsc::Sender<()>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn on_connected(&self, session_id: &str) {
        info!("connected session_id={session_id}");
    }

    async fn on_call_incoming(&self, call: &Call) -> bool {
        info!(
            "call_incoming callid={} from={} to={}",
            call.callid, call.from, call.to
        );

        // Accept from a spawned task; awaiting a command here would stall
        // the read loop that must deliver its reply.
        let Some(client) = self.client.get().cloned() else {
            return false;
        };
        let app_id = self.app_id.clone();
        let callid = call.callid.clone();
        tokio::spawn(async move {
            let channel = format!("inbound_{}", &callid[..callid.len().min(8)]);
            info!("Accepting call {callid} into channel={channel}");
            let result = client
                .accept(
                    &callid,
                    AcceptParams {
                        // Use the appid as the token when RTC tokens are
                        // not enabled.
                        token: app_id.clone(),
                        channel,
                        uid: "200".into(),
                        appid: Some(app_id),
                        ..Default::default()
                    },
                )
                .await;
            if let Err(e) = result {
                warn!("Accept failed: {e}");
            }
        });

        true
    }

    async fn on_call_ringing(&self, call: &Call) {
        info!("call_ringing callid={}", call.callid);
    }

    async fn on_call_answered(&self, call: &Call) {
        info!("call_answered callid={}", call.callid);
    }

    async fn on_bridge_start(&self, call: &Call) {
        info!(
            "agora_bridge_start callid={} channel={}",
            call.callid, call.channel
        );
    }

    async fn on_bridge_end(&self, call: &Call) {
        info!("agora_bridge_end callid={}", call.callid);
    }

    async fn on_call_hangup(&self, call: &Call) {
        info!("call_hangup callid={}", call.callid);
        let _ = self.done_tx.try_send(());
    }

    async fn on_dtmf(&self, call: &Call, digits: &str) {
        info!("dtmf_received callid={} digits={digits}", call.callid);
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
    let did = require_env("DID")?;

    let mut config = ClientConfig::new(
        format!("{cm_host}/v1/ws/events"),
        auth_token,
        format!("inbound-demo-{}", unix_millis()),
        app_id.clone(),
    );
    // Subscribe to the DID before connecting.
    config.subscribe_numbers = vec![did.clone()];

    let client = Client::new(config);
    let (done_tx, mut done_rx) = mpsc::channel(1);
    let handler = Arc::new(Handler {
        client: OnceLock::new(),
        app_id,
        done_tx,
    });
    let _ = handler.client.set(client.clone());
    client.set_handler(handler).await;

    info!("Connecting to {cm_host} ...");
    client.connect().await?;

    info!("Subscribed to DID {did}, waiting for incoming calls");
    info!("Press Ctrl+C to exit, or wait for a call to complete");

    tokio::select! {
        _ = done_rx.recv() => info!("Call completed"),
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    client.close().await;
    info!("Done");
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
