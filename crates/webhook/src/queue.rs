use std::sync::Arc;

use {
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error},
};

use crate::{envelope::Envelope, sender::Deliver};

/// Default per-session queue depth.
pub const DEFAULT_CAPACITY: usize = 256;

/// Bounded, order-preserving delivery queue for one session.
///
/// A single worker task drains the queue, so envelopes are *initiated* in
/// enqueue order. When the sink is slow enough to fill the queue, new
/// envelopes are dropped with an error log rather than backpressuring the
/// upstream event stream.
#[derive(Clone)]
pub struct DeliveryQueue {
    account_id: String,
    tx: mpsc::Sender<Envelope>,
}

impl DeliveryQueue {
    /// Spawn the worker and return the queue handle. The worker stops when
    /// `cancel` fires or every handle is dropped.
    pub fn spawn(
        account_id: &str,
        sender: Arc<dyn Deliver>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(capacity);
        let worker_account = account_id.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(account_id = worker_account, "delivery queue stopped");
                        break;
                    }
                    next = rx.recv() => {
                        let Some(envelope) = next else { break };
                        if let Err(err) = sender.deliver(&envelope).await {
                            error!(
                                account_id = worker_account,
                                event_type = envelope.event_type,
                                request_id = envelope.request_id,
                                error = %err,
                                "webhook delivery failed"
                            );
                        }
                    }
                }
            }
        });

        Self {
            account_id: account_id.to_string(),
            tx,
        }
    }

    /// Queue an envelope for delivery. Returns `false` when the envelope was
    /// dropped because the queue is full or the worker is gone.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => {
                wagate_metrics::counter!(wagate_metrics::webhook::QUEUED_TOTAL).increment(1);
                true
            },
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                wagate_metrics::counter!(wagate_metrics::webhook::DROPPED_TOTAL).increment(1);
                error!(
                    account_id = self.account_id,
                    event_type = envelope.event_type,
                    "delivery queue full, dropping webhook"
                );
                false
            },
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                wagate_metrics::counter!(wagate_metrics::webhook::DROPPED_TOTAL).increment(1);
                error!(
                    account_id = self.account_id,
                    event_type = envelope.event_type,
                    "delivery queue closed, dropping webhook"
                );
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {async_trait::async_trait, tokio::sync::Notify};

    use {
        super::*,
        crate::error::{Error, Result},
    };

    /// Records deliveries; optionally blocks until released.
    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                gate: None,
                fail: false,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                gate: Some(gate),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                gate: None,
                fail: true,
            })
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Deliver for RecordingSink {
        async fn deliver(&self, envelope: &Envelope) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.delivered
                .lock()
                .unwrap()
                .push(envelope.event_type.clone());
            if self.fail {
                Err(Error::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn envelope(event_type: &str) -> Envelope {
        Envelope::new(event_type, "acct-1", serde_json::Map::new())
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let sink = RecordingSink::new();
        let queue = DeliveryQueue::spawn("acct-1", sink.clone(), 16, CancellationToken::new());

        for event_type in ["qr", "pair_success", "status", "inbound"] {
            assert!(queue.enqueue(envelope(event_type)));
        }

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while sink.delivered().len() < 4 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(sink.delivered(), vec!["qr", "pair_success", "status", "inbound"]);
    }

    #[tokio::test]
    async fn overflow_drops_instead_of_blocking() {
        let gate = Arc::new(Notify::new());
        let sink = RecordingSink::gated(Arc::clone(&gate));
        let queue = DeliveryQueue::spawn("acct-1", sink.clone(), 2, CancellationToken::new());

        // Give the worker a moment to pull the first envelope off the queue,
        // then the two channel slots are the hard bound.
        assert!(queue.enqueue(envelope("a")));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(queue.enqueue(envelope("b")));
        assert!(queue.enqueue(envelope("c")));
        assert!(!queue.enqueue(envelope("d")), "queue should drop on overflow");

        // Release the worker; the accepted envelopes still arrive in order.
        for _ in 0..3 {
            gate.notify_one();
        }
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while sink.delivered().len() < 3 {
                gate.notify_one();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.delivered(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_stop_the_worker() {
        let sink = RecordingSink::failing();
        let queue = DeliveryQueue::spawn("acct-1", sink.clone(), 16, CancellationToken::new());

        assert!(queue.enqueue(envelope("first")));
        assert!(queue.enqueue(envelope("second")));

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while sink.delivered().len() < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.delivered(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn cancel_stops_the_worker() {
        let cancel = CancellationToken::new();
        let sink = RecordingSink::new();
        let queue = DeliveryQueue::spawn("acct-1", sink.clone(), 16, cancel.clone());

        cancel.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Worker is gone; enqueue reports the drop once the channel closes.
        // (The channel may still accept into the buffer briefly, so only
        // assert nothing gets delivered.)
        queue.enqueue(envelope("late"));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sink.delivered().is_empty());
    }
}
