use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    wagate_client::{
        EventHandler, IncomingContent, IncomingMessage, ProtocolEvent, ReceiptKind,
    },
    wagate_webhook::{Deliver, DeliveryQueue, Envelope, queue::DEFAULT_CAPACITY},
};

use crate::managed::ManagedSession;

/// Deadline for the read acknowledgement sent back for inbound group messages.
const AUTO_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Translates each session's upstream event stream into webhook envelopes.
///
/// `attach` hands out one handler per session, each with its own bounded
/// delivery queue so envelope *initiation* order matches event arrival order
/// while a slow sink never blocks the stream.
pub struct EventRouter {
    sink: Arc<dyn Deliver>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

impl EventRouter {
    #[must_use]
    pub fn new(sink: Arc<dyn Deliver>) -> Arc<Self> {
        Self::with_capacity(sink, DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(sink: Arc<dyn Deliver>, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            sink,
            queue_capacity,
            cancel: CancellationToken::new(),
        })
    }

    /// Build the event handler for one session and start its delivery queue.
    #[must_use]
    pub fn attach(&self, session: &Arc<ManagedSession>) -> Arc<SessionEventHandler> {
        let queue = DeliveryQueue::spawn(
            session.account_id(),
            Arc::clone(&self.sink),
            self.queue_capacity,
            self.cancel.child_token(),
        );
        Arc::new(SessionEventHandler {
            session: Arc::clone(session),
            queue,
        })
    }

    /// Stop every delivery queue handed out by this router.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Per-session event handler: updates session state and queues envelopes.
pub struct SessionEventHandler {
    session: Arc<ManagedSession>,
    queue: DeliveryQueue,
}

impl SessionEventHandler {
    fn account_id(&self) -> &str {
        self.session.account_id()
    }

    fn enqueue(&self, envelope: Envelope) {
        if !self.queue.enqueue(envelope) {
            error!(account_id = self.account_id(), "dropped webhook envelope");
        }
    }

    fn enqueue_status(&self, status: &str, message: &str) {
        self.enqueue(Envelope::status(self.account_id(), status, message));
    }

    async fn on_message(&self, message: IncomingMessage) {
        self.session.touch();

        info!(
            account_id = self.account_id(),
            message_id = message.id,
            from = %message.from,
            from_me = message.from_me,
            kind = message.content.kind(),
            "inbound message"
        );

        let mut data = Map::new();
        data.insert("message_id".into(), message.id.clone().into());
        data.insert("from".into(), message.from.to_string().into());
        data.insert("chat".into(), message.chat.to_string().into());
        data.insert("timestamp".into(), message.timestamp.into());
        data.insert("from_me".into(), message.from_me.into());
        data.insert("type".into(), message.content.kind().into());

        match &message.content {
            IncomingContent::Text { body } => {
                data.insert("text".into(), body.clone().into());
            },
            IncomingContent::Image { caption, mime }
            | IncomingContent::Video { caption, mime } => {
                if let Some(caption) = caption {
                    data.insert("caption".into(), caption.clone().into());
                }
                if let Some(mime) = mime {
                    data.insert("mime_type".into(), mime.clone().into());
                }
            },
            IncomingContent::Audio { ptt } => {
                data.insert("ptt".into(), (*ptt).into());
            },
            IncomingContent::Document { file_name, mime } => {
                if let Some(file_name) = file_name {
                    data.insert("filename".into(), file_name.clone().into());
                }
                if let Some(mime) = mime {
                    data.insert("mime_type".into(), mime.clone().into());
                }
            },
            IncomingContent::Location {
                latitude,
                longitude,
            } => {
                data.insert("latitude".into(), (*latitude).into());
                data.insert("longitude".into(), (*longitude).into());
            },
            IncomingContent::Contact { name, vcard } => {
                if let Some(name) = name {
                    data.insert("name".into(), name.clone().into());
                }
                data.insert("vcard".into(), vcard.clone().into());
            },
            IncomingContent::Poll { question } => {
                data.insert("question".into(), question.clone().into());
            },
            IncomingContent::Reaction { target_id, emoji } => {
                data.insert("target_id".into(), target_id.clone().into());
                data.insert("emoji".into(), emoji.clone().into());
            },
            IncomingContent::Sticker | IncomingContent::Unknown => {},
        }

        // Acknowledge group messages from others; failures must not hold up
        // the webhook.
        if !message.from_me && message.is_group() {
            let result = tokio::time::timeout(
                AUTO_READ_TIMEOUT,
                self.session.client.mark_read(
                    &message.chat,
                    &message.from,
                    std::slice::from_ref(&message.id),
                    message.timestamp,
                ),
            )
            .await;
            match result {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    warn!(account_id = self.account_id(), error = %err, "failed to mark message as read");
                },
                Err(_) => {
                    warn!(account_id = self.account_id(), "mark-read timed out");
                },
            }
        }

        self.enqueue(Envelope::new("inbound", self.account_id(), data));
    }

    fn on_receipt(&self, kind: ReceiptKind, message_ids: Vec<String>) {
        for message_id in message_ids {
            let mut data = Map::new();
            data.insert("message_id".into(), Value::String(message_id));
            let event_type = match kind {
                ReceiptKind::Delivered => {
                    data.insert("status".into(), "delivered".into());
                    "delivery"
                },
                ReceiptKind::Read => "read",
            };
            self.enqueue(Envelope::new(event_type, self.account_id(), data));
        }
    }
}

#[async_trait]
impl EventHandler for SessionEventHandler {
    async fn handle(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Message(message) => self.on_message(message).await,
            ProtocolEvent::Receipt {
                kind, message_ids, ..
            } => self.on_receipt(kind, message_ids),
            ProtocolEvent::Connected => {
                self.session.set_connected(true);
                self.session.touch();
                info!(account_id = self.account_id(), "session connected");
                self.enqueue_status("connected", "");
            },
            ProtocolEvent::Disconnected => {
                self.session.set_connected(false);
                info!(account_id = self.account_id(), "session disconnected");
                self.enqueue_status("disconnected", "");
            },
            ProtocolEvent::LoggedOut { reason } => {
                self.session.set_connected(false);
                warn!(account_id = self.account_id(), reason, "session logged out");
                self.enqueue_status("logged_out", &reason);
            },
            ProtocolEvent::StreamReplaced => {
                self.session.set_connected(false);
                warn!(account_id = self.account_id(), "stream replaced by another device");
                self.enqueue_status("stream_replaced", "logged in from another device");
            },
            ProtocolEvent::Qr { codes } => {
                let mut data = Map::new();
                data.insert("codes".into(), codes.into());
                self.enqueue(Envelope::new("qr", self.account_id(), data));
            },
            ProtocolEvent::PairSuccess {
                jid,
                business_name,
                platform,
            } => {
                info!(account_id = self.account_id(), jid = %jid, "pairing successful");
                let mut data = Map::new();
                data.insert("jid".into(), jid.to_string().into());
                data.insert("business_name".into(), business_name.into());
                data.insert("platform".into(), platform.into());
                self.enqueue(Envelope::new("pair_success", self.account_id(), data));
            },
            ProtocolEvent::GroupInfo { group, name, topic } => {
                let mut data = Map::new();
                data.insert("group_jid".into(), group.to_string().into());
                if let Some(name) = name {
                    data.insert("name".into(), name.into());
                }
                if let Some(topic) = topic {
                    data.insert("topic".into(), topic.into());
                }
                self.enqueue(Envelope::new("group_info", self.account_id(), data));
            },
            ProtocolEvent::JoinedGroup { group, created_at } => {
                let mut data = Map::new();
                data.insert("group_jid".into(), group.to_string().into());
                if let Some(created_at) = created_at {
                    data.insert("created_at".into(), created_at.into());
                }
                self.enqueue(Envelope::new("joined_group", self.account_id(), data));
            },
            ProtocolEvent::HistorySync {
                kind,
                conversation_count,
            } => {
                let mut data = Map::new();
                data.insert("type".into(), kind.into());
                data.insert("conversation_count".into(), conversation_count.into());
                self.enqueue(Envelope::new("history_sync", self.account_id(), data));
            },
            other => {
                debug!(account_id = self.account_id(), ?other, "unhandled upstream event");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        wagate_client::{Jid, ProtocolClient, testing::ScriptedClient},
        wagate_webhook::error::Result as WebhookResult,
    };

    use super::*;

    struct RecordingSink {
        envelopes: Mutex<Vec<Envelope>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                envelopes: Mutex::new(Vec::new()),
            })
        }

        fn envelopes(&self) -> Vec<Envelope> {
            self.envelopes.lock().unwrap().clone()
        }

        async fn wait_for(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.envelopes.lock().unwrap().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("expected envelopes never arrived");
        }
    }

    #[async_trait]
    impl Deliver for RecordingSink {
        async fn deliver(&self, envelope: &Envelope) -> WebhookResult<()> {
            self.envelopes.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    fn harness() -> (Arc<ScriptedClient>, Arc<ManagedSession>, Arc<RecordingSink>) {
        let client = ScriptedClient::new("dev-1");
        client.manual_connect();
        let session = ManagedSession::new("acct-1", client.clone());
        let sink = RecordingSink::new();
        let router = EventRouter::new(sink.clone());
        client.subscribe(router.attach(&session));
        (client, session, sink)
    }

    fn text_message(id: &str, chat: &str, from_me: bool) -> IncomingMessage {
        IncomingMessage {
            id: id.into(),
            from: Jid::parse("31612345678@s.whatsapp.net").unwrap(),
            chat: Jid::parse(chat).unwrap(),
            timestamp: 1_700_000_000,
            from_me,
            content: IncomingContent::Text { body: "hi".into() },
        }
    }

    #[tokio::test]
    async fn connection_events_drive_session_state_and_status_webhooks() {
        let (client, session, sink) = harness();

        client.emit(ProtocolEvent::Connected).await;
        assert!(session.is_connected());

        client
            .emit(ProtocolEvent::LoggedOut {
                reason: "device_removed".into(),
            })
            .await;
        assert!(!session.is_connected());

        sink.wait_for(2).await;
        let envelopes = sink.envelopes();
        assert_eq!(envelopes[0].event_type, "status");
        assert_eq!(envelopes[0].data["status"], "connected");
        assert_eq!(envelopes[1].data["status"], "logged_out");
        assert_eq!(envelopes[1].data["message"], "device_removed");
    }

    #[tokio::test]
    async fn webhook_order_matches_event_arrival_order() {
        let (client, _session, sink) = harness();

        client
            .emit(ProtocolEvent::Qr {
                codes: vec!["code-1".into()],
            })
            .await;
        client
            .emit(ProtocolEvent::PairSuccess {
                jid: Jid::parse("31612345678@s.whatsapp.net").unwrap(),
                business_name: String::new(),
                platform: "web".into(),
            })
            .await;
        client.emit(ProtocolEvent::Connected).await;
        client
            .emit(ProtocolEvent::Message(text_message(
                "3EB0AAA",
                "31687654321@s.whatsapp.net",
                false,
            )))
            .await;

        sink.wait_for(4).await;
        let kinds: Vec<String> = sink
            .envelopes()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds, vec!["qr", "pair_success", "status", "inbound"]);
    }

    #[tokio::test]
    async fn inbound_message_payload_and_activity_stamp() {
        let (client, session, sink) = harness();
        let before = session.last_activity();

        client
            .emit(ProtocolEvent::Message(text_message(
                "3EB0AAA",
                "31687654321@s.whatsapp.net",
                false,
            )))
            .await;

        sink.wait_for(1).await;
        let envelope = &sink.envelopes()[0];
        assert_eq!(envelope.event_type, "inbound");
        assert_eq!(envelope.wa_account_id, "acct-1");
        assert_eq!(envelope.data["message_id"], "3EB0AAA");
        assert_eq!(envelope.data["type"], "text");
        assert_eq!(envelope.data["text"], "hi");
        assert_eq!(envelope.data["from_me"], false);
        assert!(session.last_activity() >= before);
    }

    #[tokio::test]
    async fn receipts_fan_out_one_envelope_per_message_id() {
        let (client, _session, sink) = harness();

        client
            .emit(ProtocolEvent::Receipt {
                chat: Jid::parse("31687654321@s.whatsapp.net").unwrap(),
                sender: None,
                kind: ReceiptKind::Delivered,
                message_ids: vec!["3EB0AAA".into(), "3EB0BBB".into()],
                timestamp: 1_700_000_000,
            })
            .await;
        client
            .emit(ProtocolEvent::Receipt {
                chat: Jid::parse("31687654321@s.whatsapp.net").unwrap(),
                sender: None,
                kind: ReceiptKind::Read,
                message_ids: vec!["3EB0AAA".into()],
                timestamp: 1_700_000_001,
            })
            .await;

        sink.wait_for(3).await;
        let envelopes = sink.envelopes();
        assert_eq!(envelopes[0].event_type, "delivery");
        assert_eq!(envelopes[0].data["message_id"], "3EB0AAA");
        assert_eq!(envelopes[0].data["status"], "delivered");
        assert_eq!(envelopes[1].event_type, "delivery");
        assert_eq!(envelopes[1].data["message_id"], "3EB0BBB");
        assert_eq!(envelopes[2].event_type, "read");
        assert!(!envelopes[2].data.contains_key("status"));
    }

    #[tokio::test]
    async fn group_messages_from_others_get_auto_read() {
        let (client, _session, sink) = harness();
        client.set_connected(true);

        client
            .emit(ProtocolEvent::Message(text_message(
                "3EB0AAA",
                "120363020451234567@g.us",
                false,
            )))
            .await;

        sink.wait_for(1).await;
        let reads = client.reads();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].message_ids, vec!["3EB0AAA".to_string()]);
    }

    #[tokio::test]
    async fn own_and_direct_messages_are_not_auto_read() {
        let (client, _session, sink) = harness();
        client.set_connected(true);

        // From self, in a group.
        client
            .emit(ProtocolEvent::Message(text_message(
                "3EB0AAA",
                "120363020451234567@g.us",
                true,
            )))
            .await;
        // From other, direct chat.
        client
            .emit(ProtocolEvent::Message(text_message(
                "3EB0BBB",
                "31687654321@s.whatsapp.net",
                false,
            )))
            .await;

        sink.wait_for(2).await;
        assert!(client.reads().is_empty());
    }

    #[tokio::test]
    async fn auto_read_failure_does_not_block_the_webhook() {
        let (client, _session, sink) = harness();
        // Not connected: mark_read errors, inbound webhook still flows.

        client
            .emit(ProtocolEvent::Message(text_message(
                "3EB0AAA",
                "120363020451234567@g.us",
                false,
            )))
            .await;

        sink.wait_for(1).await;
        assert_eq!(sink.envelopes()[0].event_type, "inbound");
    }

    #[tokio::test]
    async fn history_sync_envelope() {
        let (client, _session, sink) = harness();

        client
            .emit(ProtocolEvent::HistorySync {
                kind: "INITIAL_BOOTSTRAP".into(),
                conversation_count: 42,
            })
            .await;

        sink.wait_for(1).await;
        let envelope = &sink.envelopes()[0];
        assert_eq!(envelope.event_type, "history_sync");
        assert_eq!(envelope.data["type"], "INITIAL_BOOTSTRAP");
        assert_eq!(envelope.data["conversation_count"], 42);
    }
}
