use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::events::{EventFrame, EventKind};
use crate::types::{Call, CallDirection, CallState};

/// Composite key addressing an outbound call before its callid is assigned.
pub(crate) fn channel_key(channel: &str, uid: &str) -> String {
    format!("{channel}:{uid}")
}

/// In-memory table of the calls this client is tracking.
///
/// A record lives under exactly one key at a time: the `channel:uid`
/// composite while an outbound dial awaits its callid, the callid
/// afterwards. Readers get cloned snapshots; every mutation happens under
/// the write half of the lock.
#[derive(Default)]
pub(crate) struct CallRegistry {
    calls: RwLock<HashMap<String, Call>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: &str, call: Call) {
        self.calls.write().await.insert(key.to_owned(), call);
    }

    pub async fn remove(&self, key: &str) {
        self.calls.write().await.remove(key);
    }

    /// Moves the provisional record under its server-assigned callid.
    ///
    /// Events may outrun the dial reply; if one already created a record
    /// under the callid, the provisional fields fill its gaps and the
    /// event's fresher state wins. Either way the composite key is gone
    /// afterwards, so a late frame cannot reinstall it.
    pub async fn promote(&self, provisional_key: &str, callid: &str) {
        let mut calls = self.calls.write().await;
        let Some(mut call) = calls.remove(provisional_key) else {
            return;
        };
        call.callid = callid.to_owned();

        match calls.get_mut(callid) {
            Some(existing) => {
                if existing.from.is_empty() {
                    existing.from = call.from;
                }
                if existing.to.is_empty() {
                    existing.to = call.to;
                }
                if existing.channel.is_empty() {
                    existing.channel = call.channel;
                }
                if existing.uid.is_empty() {
                    existing.uid = call.uid;
                }
                if existing.direction.is_none() {
                    existing.direction = call.direction;
                }
                if existing.appid.is_none() {
                    existing.appid = call.appid;
                }
            }
            None => {
                calls.insert(callid.to_owned(), call);
            }
        }
    }

    pub async fn get(&self, callid: &str) -> Option<Call> {
        self.calls.read().await.get(callid).cloned()
    }

    /// The appid cached on a call, echoed by commands in MULTI mode.
    pub async fn appid(&self, callid: &str) -> Option<String> {
        self.calls
            .read()
            .await
            .get(callid)
            .and_then(|call| call.appid.clone())
    }

    pub async fn set_appid(&self, callid: &str, appid: &str) {
        if let Some(call) = self.calls.write().await.get_mut(callid) {
            call.appid = Some(appid.to_owned());
        }
    }

    pub async fn snapshot(&self) -> Vec<Call> {
        self.calls.read().await.values().cloned().collect()
    }

    /// Applies one inbound event: find the record (callid first, then the
    /// composite), create it for unknown calls, merge the frame's non-empty
    /// fields, apply the state transition, and drop terminal records under
    /// both keys. Returns a snapshot for the dispatcher, or `None` when the
    /// event should be ignored.
    pub async fn apply_event(&self, kind: EventKind, frame: &EventFrame) -> Option<Call> {
        let callid = frame.callid.as_deref().unwrap_or("");
        let mut calls = self.calls.write().await;

        let mut key = None;
        if !callid.is_empty() && calls.contains_key(callid) {
            key = Some(callid.to_owned());
        } else if let (Some(channel), Some(uid)) = (frame.channel.as_deref(), frame.uid.as_deref())
        {
            if !channel.is_empty() && !uid.is_empty() {
                let composite = channel_key(channel, uid);
                if calls.contains_key(&composite) {
                    key = Some(composite);
                }
            }
        }

        let key = match key {
            Some(key) => key,
            None => {
                // Unknown call. A hangup for an untracked call is a no-op;
                // anything else with a callid starts tracking it.
                if callid.is_empty() || kind == EventKind::Hangup {
                    return None;
                }
                calls.insert(
                    callid.to_owned(),
                    Call {
                        callid: callid.to_owned(),
                        state: kind.initial_state(),
                        direction: None,
                        from: String::new(),
                        to: String::new(),
                        channel: frame.channel.clone().unwrap_or_default(),
                        uid: frame.uid.clone().unwrap_or_default(),
                        appid: None,
                    },
                );
                callid.to_owned()
            }
        };

        let call = calls.get_mut(&key)?;

        // Merge the frame's contextual fields before the state transition.
        if !callid.is_empty() {
            call.callid = callid.to_owned();
        }
        if let Some(channel) = frame.channel.as_deref().filter(|v| !v.is_empty()) {
            call.channel = channel.to_owned();
        }
        if let Some(uid) = frame.uid.as_deref().filter(|v| !v.is_empty()) {
            call.uid = uid.to_owned();
        }
        if let Some(from) = frame.from.as_deref().filter(|v| !v.is_empty()) {
            call.from = from.to_owned();
        }
        if let Some(to) = frame.to.as_deref().filter(|v| !v.is_empty()) {
            call.to = to.to_owned();
        }
        if let Some(appid) = frame.appid.as_deref().filter(|v| !v.is_empty()) {
            call.appid = Some(appid.to_owned());
        }
        if let Some(direction) = frame.direction.as_deref().and_then(CallDirection::parse) {
            call.direction = Some(direction);
        }

        match kind {
            EventKind::Incoming => {
                call.state = CallState::Incoming;
                call.direction = Some(CallDirection::Inbound);
            }
            EventKind::Ringing => call.state = CallState::Ringing,
            EventKind::Answered => call.state = CallState::Answered,
            EventKind::BridgeStart => call.state = CallState::Bridged,
            EventKind::BridgeEnd => call.state = CallState::Unbridged,
            EventKind::Dtmf => {}
            EventKind::Hangup => {
                call.state = CallState::Hangup;
                let snapshot = call.clone();
                // Remove under both addressing keys in the same critical
                // section; no alias may survive a hangup.
                calls.remove(&key);
                if !callid.is_empty() {
                    calls.remove(callid);
                }
                if !snapshot.channel.is_empty() && !snapshot.uid.is_empty() {
                    calls.remove(&channel_key(&snapshot.channel, &snapshot.uid));
                }
                return Some(snapshot);
            }
        }

        Some(call.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisional(channel: &str, uid: &str) -> Call {
        Call {
            callid: String::new(),
            state: CallState::Ringing,
            direction: Some(CallDirection::Outbound),
            from: "+15551234567".into(),
            to: "+18005551234".into(),
            channel: channel.into(),
            uid: uid.into(),
            appid: None,
        }
    }

    fn frame(event: &str, callid: &str) -> EventFrame {
        EventFrame {
            event: Some(event.into()),
            callid: Some(callid.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn promote_moves_record_under_callid() {
        let registry = CallRegistry::new();
        registry
            .insert(&channel_key("ch1", "100"), provisional("ch1", "100"))
            .await;

        registry.promote(&channel_key("ch1", "100"), "C1").await;

        let call = registry.get("C1").await.expect("promoted record");
        assert_eq!(call.callid, "C1");
        assert_eq!(call.channel, "ch1");
        assert!(registry.get(&channel_key("ch1", "100")).await.is_none());
    }

    #[tokio::test]
    async fn promote_merges_into_record_created_by_early_event() {
        let registry = CallRegistry::new();
        registry
            .insert(&channel_key("ch1", "100"), provisional("ch1", "100"))
            .await;

        // call_answered with only a callid beats the dial reply.
        let early = frame("call_answered", "C1");
        let snapshot = registry
            .apply_event(EventKind::Answered, &early)
            .await
            .expect("event creates the record");
        assert_eq!(snapshot.state, CallState::Answered);

        registry.promote(&channel_key("ch1", "100"), "C1").await;

        let call = registry.get("C1").await.expect("merged record");
        // The event's state survives; the provisional fills the gaps.
        assert_eq!(call.state, CallState::Answered);
        assert_eq!(call.to, "+18005551234");
        assert_eq!(call.channel, "ch1");
        assert_eq!(call.direction, Some(CallDirection::Outbound));
        assert!(registry.get(&channel_key("ch1", "100")).await.is_none());
        assert_eq!(registry.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn hangup_removes_both_keys() {
        let registry = CallRegistry::new();
        registry
            .insert(&channel_key("ch1", "100"), provisional("ch1", "100"))
            .await;
        registry.promote(&channel_key("ch1", "100"), "C1").await;

        let mut hangup = frame("call_hangup", "C1");
        hangup.channel = Some("ch1".into());
        hangup.uid = Some("100".into());
        let snapshot = registry
            .apply_event(EventKind::Hangup, &hangup)
            .await
            .expect("snapshot of the removed call");

        assert_eq!(snapshot.state, CallState::Hangup);
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn hangup_for_unknown_call_is_a_noop() {
        let registry = CallRegistry::new();
        let result = registry
            .apply_event(EventKind::Hangup, &frame("call_hangup", "nope"))
            .await;
        assert!(result.is_none());
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn event_with_unknown_callid_creates_record() {
        let registry = CallRegistry::new();
        let mut incoming = frame("call_incoming", "C2");
        incoming.from = Some("+15551234567".into());
        incoming.to = Some("+18005551234".into());

        let call = registry
            .apply_event(EventKind::Incoming, &incoming)
            .await
            .expect("created record");

        assert_eq!(call.state, CallState::Incoming);
        assert_eq!(call.direction, Some(CallDirection::Inbound));
        assert_eq!(call.from, "+15551234567");
        assert!(registry.get("C2").await.is_some());
    }

    #[tokio::test]
    async fn dtmf_leaves_state_untouched() {
        let registry = CallRegistry::new();
        registry
            .insert(&channel_key("ch1", "100"), provisional("ch1", "100"))
            .await;
        registry.promote(&channel_key("ch1", "100"), "C1").await;
        let _ = registry
            .apply_event(EventKind::BridgeStart, &frame("agora_bridge_start", "C1"))
            .await;

        let mut dtmf = frame("dtmf_received", "C1");
        dtmf.digits = Some("5".into());
        let call = registry
            .apply_event(EventKind::Dtmf, &dtmf)
            .await
            .expect("existing record");

        assert_eq!(call.state, CallState::Bridged);
    }
}
