//! Places an outbound call, waits for call events (answered, bridge, DTMF),
//! then hangs up after a short hold.
//!
//! ```sh
//! export CM_HOST="wss://your-cm-host"
//! export AUTH_TOKEN="Basic YOUR_TOKEN"
//! export APPID="your_appid"
//! export TO_NUMBER="+18005551234"
//! export FROM_NUMBER="+15551234567"
//! export SIP="your-lb-host:5081;transport=tls"
//! cargo run --example outbound
//! ```

use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use telephony::{Call, Client, ClientConfig, ClientError, DialParams, EventHandler};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct Handler {
    bridged_tx: mpsc::Sender<()>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn on_connected(&self, session_id: &str) {
        info!("connected session_id={session_id}");
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
        let _ = self.bridged_tx.try_send(());
    }

    async fn on_bridge_end(&self, call: &Call) {
        info!("agora_bridge_end callid={}", call.callid);
    }

    async fn on_call_hangup(&self, call: &Call) {
        info!("call_hangup callid={}", call.callid);
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

    let cm_host = env_or_default("CM_HOST", "wss://your-cm-host");
    let auth_token = require_env("AUTH_TOKEN")?;
    let app_id = require_env("APPID")?;
    let to_number = require_env("TO_NUMBER")?;
    let from_number = env_or_default("FROM_NUMBER", "+15551234567");
    let region = env_or_default("REGION", "AREA_CODE_NA");
    let sip = std::env::var("SIP").ok();

    let channel = format!("demo_{}", unix_millis());
    let config = ClientConfig::new(
        format!("{cm_host}/v1/ws/events"),
        auth_token,
        format!("outbound-demo-{}", unix_millis()),
        app_id.clone(),
    );
    let client = Client::new(config);

    let (bridged_tx, mut bridged_rx) = mpsc::channel(1);
    client.set_handler(Arc::new(Handler { bridged_tx })).await;

    info!("Connecting to {cm_host} ...");
    client.connect().await?;

    info!("Dialing {to_number} from {from_number} ...");
    let result = client
        .dial(DialParams {
            to: to_number,
            from: from_number,
            channel: channel.clone(),
            uid: "100".into(),
            // Use the appid as the token when RTC tokens are not enabled.
            token: app_id,
            region,
            timeout: "60".into(),
            sip,
            ..Default::default()
        })
        .await?;

    if !result.success {
        client.close().await;
        anyhow::bail!("Call not successful, no gateways available");
    }
    info!("Call placed: callid={} channel={channel}", result.callid);

    match timeout(Duration::from_secs(30), bridged_rx.recv()).await {
        Ok(_) => info!("Call bridged to Agora channel"),
        Err(_) => warn!("Timeout waiting for bridge, hanging up"),
    }

    info!("Sending DTMF: 1234#");
    if let Err(e) = client.send_dtmf(&result.callid, "1234#").await {
        warn!("SendDTMF failed: {e}");
    }

    // Hold briefly, then hang up.
    sleep(Duration::from_secs(2)).await;
    info!("Hanging up...");
    if let Err(e) = client.hangup(&result.callid).await {
        warn!("Hangup failed: {e}");
    }

    sleep(Duration::from_secs(2)).await;
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
