mod common;

use common::{connect_client, mock_factory, test_config, Outbound, RecordingHandler};
use serde_json::json;
use std::time::Duration;
use telephony::{Client, ClientError};
use tokio::time::Instant;

#[tokio::test]
async fn request_ids_are_unique_and_ordered() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let mut server = connect_client(&client, &mut servers).await;

    let mut seen = std::collections::HashSet::new();
    for (i, reason) in ["a", "b", "c"].iter().enumerate() {
        let task = {
            let client = client.clone();
            let reason = reason.to_string();
            tokio::spawn(async move { client.reject("C1", &reason).await })
        };
        let frame = server.expect_text().await;
        let request_id = frame["request_id"].as_str().unwrap().to_owned();
        assert_eq!(request_id, format!("reject_{}", i + 1));
        assert!(seen.insert(request_id.clone()), "duplicate request id");
        server.push_text(json!({"request_id": request_id})).await;
        task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn concurrent_replies_resolve_their_own_waiters() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let mut server = connect_client(&client, &mut servers).await;

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.reject("C1", "busy").await })
    };
    let first_frame = server.expect_text().await;

    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.reject("C2", "busy").await })
    };
    let second_frame = server.expect_text().await;

    // Answer out of order; each reply must unblock its own issuer.
    server
        .push_text(json!({
            "request_id": second_frame["request_id"],
            "error": "no such call"
        }))
        .await;
    let second_result = second.await.unwrap();
    assert!(matches!(second_result, Err(ClientError::Server(msg)) if msg == "no such call"));
    assert!(!first.is_finished());

    server
        .push_text(json!({"request_id": first_frame["request_id"]}))
        .await;
    first.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn command_times_out_after_thirty_seconds() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let mut server = connect_client(&client, &mut servers).await;

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.reject("C1", "busy").await })
    };
    server.expect_text().await;

    let started = Instant::now();
    let result = task.await.unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ClientError::Timeout)));
    assert!(
        elapsed > Duration::from_secs(29) && elapsed <= Duration::from_secs(31),
        "timeout fired after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn abandoned_command_releases_its_request_slot() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let (handler, mut handler_events) = RecordingHandler::new(false);
    client.set_handler(handler).await;
    let mut server = connect_client(&client, &mut servers).await;
    assert_eq!(handler_events.recv().await.unwrap(), "connected:session-1");

    // The caller gives up long before the command's own 30 s bound.
    let result =
        tokio::time::timeout(Duration::from_millis(50), client.reject("C1", "busy")).await;
    assert!(result.is_err(), "reject should still be waiting");

    let frame = server.expect_text().await;
    assert_eq!(frame["action"], "reject");

    // A late frame echoing the cancelled request id no longer matches a
    // pending entry, so it is routed as an ordinary event.
    server
        .push_text(json!({
            "request_id": frame["request_id"],
            "event": "call_incoming",
            "callid": "CX"
        }))
        .await;
    assert_eq!(handler_events.recv().await.unwrap(), "incoming:CX");
    assert!(client.active_calls().await.is_empty());
}

#[tokio::test]
async fn commands_while_disconnected_fail_immediately() {
    let (factory, _servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);

    let result = client.reject("C1", "busy").await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn connection_loss_unblocks_every_pending_command() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let (handler, mut handler_events) = RecordingHandler::new(false);
    client.set_handler(handler).await;
    let mut server = connect_client(&client, &mut servers).await;
    assert_eq!(handler_events.recv().await.unwrap(), "connected:session-1");

    let mut tasks = Vec::new();
    for callid in ["C1", "C2", "C3"] {
        let client = client.clone();
        tasks.push(tokio::spawn(
            async move { client.reject(callid, "busy").await },
        ));
        server.expect_text().await;
    }

    server.drop_connection().await;

    for task in tasks {
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionLost)));
    }
    assert_eq!(
        handler_events.recv().await.unwrap(),
        format!("error:{}", ClientError::ConnectionLost)
    );
}

#[tokio::test(start_paused = true)]
async fn pings_are_sent_every_five_seconds() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let mut server = connect_client(&client, &mut servers).await;

    let mut last = Instant::now();
    for _ in 0..3 {
        loop {
            match server.next_outbound().await.unwrap() {
                Outbound::Ping => break,
                _ => continue,
            }
        }
        let gap = last.elapsed();
        assert!(
            gap >= Duration::from_secs(5) && gap < Duration::from_millis(5100),
            "ping gap was {gap:?}"
        );
        last = Instant::now();
    }

    client.close().await;
}

#[tokio::test]
async fn inbound_ping_is_echoed_with_pong() {
    let (factory, mut servers) = mock_factory();
    let client = Client::with_transport_factory(test_config(), factory);
    let mut server = connect_client(&client, &mut servers).await;

    server
        .push_event(telephony::TransportEvent::PingReceived(
            bytes::Bytes::from_static(b"ka"),
        ))
        .await;

    loop {
        match server.next_outbound().await.unwrap() {
            Outbound::Pong(payload) => {
                assert_eq!(&payload[..], b"ka");
                break;
            }
            _ => continue,
        }
    }
}
