//! Test harness: a full gateway wired to a scripted protocol backend and a
//! local webhook capture sink.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, OnceLock},
};

use {
    axum::{
        Router,
        body::Bytes,
        extract::{Path, State},
        http::HeaderMap,
        routing::post,
    },
    tokio::net::TcpListener,
};

use {
    wagate_client::ProtocolClient,
    wagate_client::testing::{ScriptedClient, ScriptedFactory},
    wagate_config::Config,
    wagate_gateway::{server::Gateway, state::AppState},
    wagate_metrics::MetricsHandle,
    wagate_store::DeviceStore,
};

/// One webhook delivery captured by the sink.
#[derive(Debug, Clone)]
pub struct CapturedDelivery {
    pub event_type: String,
    pub body: Vec<u8>,
    pub signature: String,
    pub request_id: String,
}

#[derive(Default)]
pub struct SinkCapture {
    deliveries: Mutex<Vec<CapturedDelivery>>,
}

impl SinkCapture {
    pub fn deliveries(&self) -> Vec<CapturedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<CapturedDelivery> {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                {
                    let deliveries = self.deliveries.lock().unwrap();
                    if deliveries.len() >= count {
                        return deliveries.clone();
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expected webhook deliveries never arrived")
    }
}

async fn capture_handler(
    State(sink): State<Arc<SinkCapture>>,
    Path(event_type): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    sink.deliveries.lock().unwrap().push(CapturedDelivery {
        event_type,
        body: body.to_vec(),
        signature: header("x-wa-signature"),
        request_id: header("x-request-id"),
    });
    "ok"
}

async fn spawn_sink() -> (SocketAddr, Arc<SinkCapture>) {
    let sink = Arc::new(SinkCapture::default());
    let app = Router::new()
        .route("/{event_type}", post(capture_handler))
        .with_state(Arc::clone(&sink));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, sink)
}

fn metrics_handle() -> MetricsHandle {
    static HANDLE: OnceLock<MetricsHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| wagate_metrics::init_metrics().expect("metrics recorder"))
        .clone()
}

pub const SIGNING_SECRET: &str = "test-signing-secret";

pub struct TestGateway {
    pub base: String,
    pub factory: Arc<ScriptedFactory>,
    pub state: AppState,
    pub sink: Arc<SinkCapture>,
    pub http: reqwest::Client,
}

impl TestGateway {
    /// Spawn a gateway with the given send-rate capacity and zero jitter.
    pub async fn spawn(send_rate_per_minute: u32) -> Self {
        let (sink_addr, sink) = spawn_sink().await;

        let config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("sqlite::memory:".into()),
            "LARAVEL_WEBHOOK_BASE" => Some(format!("http://{sink_addr}")),
            "GO_WA_SIGNING_SECRET" => Some(SIGNING_SECRET.into()),
            "SEND_RATE_PER_MINUTE_DEFAULT" => Some(send_rate_per_minute.to_string()),
            "SEND_JITTER_MIN_MS" => Some("0".into()),
            "SEND_JITTER_MAX_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap();

        let factory = ScriptedFactory::new();
        let gateway = Gateway::bootstrap(config, factory.clone(), metrics_handle())
            .await
            .unwrap();
        let state = gateway.state.clone();
        let app = gateway.router();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            factory,
            state,
            sink,
            http: reqwest::Client::new(),
        }
    }

    /// The scripted client backing `account_id`'s session. The session must
    /// already exist (any endpoint touching the account creates it).
    pub async fn client(&self, account_id: &str) -> Arc<ScriptedClient> {
        let record = self
            .state
            .devices
            .mapping(account_id)
            .await
            .unwrap()
            .expect("no device mapped for account");
        self.factory.client(&record.device_jid)
    }

    /// Create the session and mark it connected (emits a `status: connected`
    /// webhook via the scripted client's auto-connect).
    pub async fn connect(&self, account_id: &str) -> Arc<ScriptedClient> {
        let response = self
            .http
            .get(format!("{}/v1/sessions/{account_id}/status", self.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let client = self.client(account_id).await;
        client.connect().await.unwrap();
        client
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }
}
