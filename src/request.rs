use log::{debug, warn};
use serde_json::{Map, Value};
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::client::{Client, ClientError};

/// Upper bound on server responsiveness for any single command.
pub(crate) const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Extracts the server-reported failure from a reply frame, if any.
pub(crate) fn reply_error(reply: &Value) -> Option<String> {
    reply
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

impl Client {
    /// Generates the next request id, unique within this client session.
    pub(crate) fn next_request_id(&self, action: &str) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        format!("{action}_{n}")
    }

    fn pending_install(&self, request_id: &str, tx: oneshot::Sender<Option<Value>>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.to_owned(), tx);
    }

    fn pending_take(&self, request_id: &str) -> Option<oneshot::Sender<Option<Value>>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id)
    }

    /// Sends a command frame and waits for the correlated reply.
    ///
    /// The delivery slot is installed before the write so a fast reply
    /// cannot be lost. `ConnectionLost` means the connection was torn down
    /// while the command was in flight. Dropping the returned future
    /// cancels the command: the slot is removed on the spot; no
    /// cancellation is sent to the server.
    pub(crate) async fn send_command(
        &self,
        action: &str,
        mut frame: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let request_id = self.next_request_id(action);
        frame.insert("request_id".into(), Value::String(request_id.clone()));

        let (tx, rx) = oneshot::channel();
        self.pending_install(&request_id, tx);

        // Runs on every exit, including the caller dropping this future
        // mid-wait. Once a reply or the sweep has claimed the slot it is a
        // no-op.
        let _guard = scopeguard::guard((), |_| {
            let _ = self.pending_take(&request_id);
        });

        debug!(target: "Client/Send", "{action} request_id={request_id}");
        transport
            .send_text(Value::Object(frame).to_string())
            .await?;

        match timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Some(reply))) => Ok(reply),
            Ok(Ok(None)) | Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                warn!(target: "Client/Send", "{request_id} timed out waiting for reply");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Hands a tagged reply to its waiting command. Gives the frame back
    /// when no pending request matches, so it can flow on as an event.
    pub(crate) fn deliver_reply(&self, request_id: &str, reply: Value) -> Option<Value> {
        match self.pending_take(request_id) {
            Some(tx) => {
                if tx.send(Some(reply)).is_err() {
                    debug!(target: "Client/Recv", "Waiter for {request_id} is gone");
                }
                None
            }
            None => Some(reply),
        }
    }

    /// Unblocks every in-flight command with the connection-lost sentinel.
    /// The table is empty afterwards.
    pub(crate) fn sweep_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (request_id, tx) in pending.drain() {
            debug!(target: "Client/Send", "Sweeping pending request {request_id}");
            let _ = tx.send(None);
        }
    }
}
