#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end webhook tests: pairing, event fan-out, signatures.

mod common;

use std::time::Duration;

use {
    base64::Engine as _,
    wagate_client::{
        IncomingContent, IncomingMessage, Jid, PairingUpdate, ProtocolEvent,
    },
    wagate_webhook::verify_signature,
};

use common::{SIGNING_SECRET, TestGateway};

#[tokio::test]
async fn qr_pairing_happy_path() {
    let gw = TestGateway::spawn(15).await;

    // Pre-create the session so the QR script is in place before pairing.
    gw.get("/v1/sessions/acct-qr/status").await;
    let client = gw.client("acct-qr").await;
    client.manual_connect();
    client.script_qr(vec![PairingUpdate::Code {
        code: "2@abcdefghijklmnop".into(),
        timeout: Duration::from_secs(60),
    }]);

    let response = gw
        .http
        .post(format!("{}/v1/sessions/acct-qr/qr", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["session_state"], "awaiting_scan");
    assert!(!body["expires_at"].as_str().unwrap().is_empty());

    // The QR payload is a PNG, base64-encoded.
    let png = base64::engine::general_purpose::STANDARD
        .decode(body["qr_code"].as_str().unwrap())
        .unwrap();
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

    // The scan lands: upstream reports pairing success, then the stream
    // connects. The sink sees both envelopes in that order, signed.
    client
        .emit(ProtocolEvent::PairSuccess {
            jid: Jid::parse("31612345678@s.whatsapp.net").unwrap(),
            business_name: String::new(),
            platform: "web".into(),
        })
        .await;
    client.set_connected(true);
    client.emit(ProtocolEvent::Connected).await;

    let deliveries = gw.sink.wait_for(2).await;
    assert_eq!(deliveries[0].event_type, "pair_success");
    assert_eq!(deliveries[1].event_type, "status");
    for delivery in &deliveries {
        assert!(
            verify_signature(&delivery.body, &delivery.signature, SIGNING_SECRET),
            "signature must verify for {}",
            delivery.event_type
        );
    }

    let status: serde_json::Value = serde_json::from_slice(&deliveries[1].body).unwrap();
    assert_eq!(status["data"]["status"], "connected");
    assert_eq!(status["wa_account_id"], "acct-qr");
}

#[tokio::test]
async fn qr_timeout_maps_to_timeout_error() {
    let gw = TestGateway::spawn(15).await;

    gw.get("/v1/sessions/acct-qrto/status").await;
    let client = gw.client("acct-qrto").await;
    client.manual_connect();
    client.script_qr(vec![PairingUpdate::Timeout]);

    let response = gw
        .http
        .post(format!("{}/v1/sessions/acct-qrto/qr", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 408);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "timeout");
}

#[tokio::test]
async fn pairing_on_connected_session_is_rejected() {
    let gw = TestGateway::spawn(15).await;
    gw.connect("acct-paired").await;

    let response = gw
        .http
        .post(format!("{}/v1/sessions/acct-paired/qr", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "already_connected");
}

#[tokio::test]
async fn phone_pairing_returns_code() {
    let gw = TestGateway::spawn(15).await;

    gw.get("/v1/sessions/acct-code/status").await;
    let client = gw.client("acct-code").await;
    client.manual_connect();
    client.script_pair_code("WZYX-1234");

    let response = gw
        .post_json(
            "/v1/sessions/acct-code/pair",
            serde_json::json!({"phone_number": "+31612345678"}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["pairing_code"], "WZYX-1234");
    assert_eq!(body["expires_in"], 300);
}

#[tokio::test]
async fn inbound_message_envelope_is_signed_and_complete() {
    let gw = TestGateway::spawn(15).await;
    let client = gw.connect("acct-in").await;

    // Swallow the connect status delivery first.
    gw.sink.wait_for(1).await;

    client
        .emit(ProtocolEvent::Message(IncomingMessage {
            id: "3EB0FACE".into(),
            from: Jid::parse("31687654321@s.whatsapp.net").unwrap(),
            chat: Jid::parse("31687654321@s.whatsapp.net").unwrap(),
            timestamp: 1_700_000_000,
            from_me: false,
            content: IncomingContent::Text {
                body: "ping".into(),
            },
        }))
        .await;

    let deliveries = gw.sink.wait_for(2).await;
    let inbound = &deliveries[1];
    assert_eq!(inbound.event_type, "inbound");
    assert!(verify_signature(&inbound.body, &inbound.signature, SIGNING_SECRET));

    let envelope: serde_json::Value = serde_json::from_slice(&inbound.body).unwrap();
    assert_eq!(envelope["event_type"], "inbound");
    assert_eq!(envelope["wa_account_id"], "acct-in");
    assert_eq!(envelope["data"]["message_id"], "3EB0FACE");
    assert_eq!(envelope["data"]["type"], "text");
    assert_eq!(envelope["data"]["text"], "ping");
    // Empty tenant id is omitted from the canonical bytes.
    assert!(envelope.get("tenant_id").is_none());
    // The X-Request-ID header matches the envelope's request id.
    assert_eq!(envelope["request_id"], inbound.request_id.as_str());
}

#[tokio::test]
async fn deliveries_for_one_session_arrive_in_event_order() {
    let gw = TestGateway::spawn(15).await;
    let client = gw.connect("acct-ord").await;
    gw.sink.wait_for(1).await;

    for i in 0..5 {
        client
            .emit(ProtocolEvent::Message(IncomingMessage {
                id: format!("3EB0{i:04}"),
                from: Jid::parse("31687654321@s.whatsapp.net").unwrap(),
                chat: Jid::parse("31687654321@s.whatsapp.net").unwrap(),
                timestamp: 1_700_000_000 + i,
                from_me: false,
                content: IncomingContent::Text {
                    body: format!("message {i}"),
                },
            }))
            .await;
    }

    let deliveries = gw.sink.wait_for(6).await;
    let ids: Vec<String> = deliveries[1..]
        .iter()
        .map(|d| {
            let envelope: serde_json::Value = serde_json::from_slice(&d.body).unwrap();
            envelope["data"]["message_id"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(ids, vec!["3EB00000", "3EB00001", "3EB00002", "3EB00003", "3EB00004"]);
}

#[tokio::test]
async fn stream_loss_notifies_the_sink() {
    let gw = TestGateway::spawn(15).await;
    let client = gw.connect("acct-drop").await;
    gw.sink.wait_for(1).await;

    client.emit(ProtocolEvent::StreamReplaced).await;

    let deliveries = gw.sink.wait_for(2).await;
    let envelope: serde_json::Value = serde_json::from_slice(&deliveries[1].body).unwrap();
    assert_eq!(envelope["data"]["status"], "stream_replaced");
    assert_eq!(gw.state.sessions.connected_count().await, 0);
}
