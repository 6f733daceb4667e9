use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        middleware,
        routing::{get, post},
    },
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
    },
    tracing::{info, warn},
};

use {
    wagate_client::ClientFactory,
    wagate_config::Config,
    wagate_metrics::MetricsHandle,
    wagate_session::{EventRouter, IdempotencyStore, SessionManager, SessionManagerConfig},
    wagate_store::SqliteDeviceStore,
    wagate_webhook::{RetryPolicy, Sender},
};

use crate::{
    account_routes, chat_routes, contact_routes, group_routes, health, message_routes,
    newsletter_routes, rate_limit, rate_limit::SendRateLimiter, request_id, session_routes,
    state::AppState,
};

/// How long in-flight HTTP requests get to finish after the shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);
const REAP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Build the full gateway router (shared between production startup and
/// tests).
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Outbound-producing endpoints sit behind the per-account admission
    // layer; everything else is unguarded.
    let send_routes = Router::new()
        .route("/v1/messages", post(message_routes::send_message))
        .route(
            "/v1/messages/{message_id}/delete",
            post(message_routes::delete_message),
        )
        .route(
            "/v1/messages/{message_id}/revoke",
            post(message_routes::revoke_message),
        )
        .route(
            "/v1/messages/{message_id}/react",
            post(message_routes::react_to_message),
        )
        .route(
            "/v1/messages/{message_id}/update",
            post(message_routes::update_message),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::admit,
        ));

    let open_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/v1/sessions/{account_id}/qr", post(session_routes::start_qr))
        .route(
            "/v1/sessions/{account_id}/pair",
            post(session_routes::pair_with_code),
        )
        .route(
            "/v1/sessions/{account_id}/reconnect",
            post(session_routes::reconnect),
        )
        .route("/v1/sessions/{account_id}/logout", post(session_routes::logout))
        .route("/v1/sessions/{account_id}/status", get(session_routes::status))
        .route(
            "/v1/groups",
            get(group_routes::list_groups).post(group_routes::create_group),
        )
        .route("/v1/groups/join", post(group_routes::join_group))
        .route("/v1/groups/preview", get(group_routes::group_preview))
        .route("/v1/groups/{group_id}", get(group_routes::group_info))
        .route(
            "/v1/groups/{group_id}/participants",
            post(group_routes::manage_participants),
        )
        .route("/v1/groups/{group_id}/photo", post(group_routes::set_group_photo))
        .route("/v1/groups/{group_id}/name", post(group_routes::set_group_name))
        .route(
            "/v1/groups/{group_id}/locked",
            post(group_routes::set_group_locked),
        )
        .route(
            "/v1/groups/{group_id}/announce",
            post(group_routes::set_group_announce),
        )
        .route("/v1/groups/{group_id}/topic", post(group_routes::set_group_topic))
        .route(
            "/v1/groups/{group_id}/invite_link",
            get(group_routes::group_invite_link),
        )
        .route("/v1/groups/{group_id}/leave", post(group_routes::leave_group))
        .route(
            "/v1/account/avatar",
            get(account_routes::get_avatar).post(account_routes::change_avatar),
        )
        .route("/v1/account/push_name", post(account_routes::change_push_name))
        .route("/v1/account/status", post(account_routes::set_status))
        .route("/v1/account/user_info", get(account_routes::user_info))
        .route(
            "/v1/account/business_profile",
            get(account_routes::business_profile),
        )
        .route("/v1/account/privacy", get(account_routes::privacy_settings))
        .route("/v1/account/user_check", get(account_routes::check_user_exists))
        .route("/v1/chats", get(chat_routes::list_chats))
        .route("/v1/chats/{chat_id}/messages", get(chat_routes::chat_messages))
        .route("/v1/chats/{chat_id}/pin", post(chat_routes::pin_chat))
        .route("/v1/chats/{chat_id}/read", post(chat_routes::mark_as_read))
        .route("/v1/chats/{chat_id}/archive", post(chat_routes::archive_chat))
        .route("/v1/chats/{chat_id}/mute", post(chat_routes::mute_chat))
        .route("/v1/contacts", get(contact_routes::list_contacts))
        .route("/v1/newsletters", get(newsletter_routes::list_newsletters));

    Router::new()
        .merge(open_routes)
        .merge(send_routes)
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .layer(middleware::from_fn(request_id::stamp))
        .with_state(state)
}

/// A bootstrapped gateway: shared state plus the handles the shutdown
/// sequence needs.
pub struct Gateway {
    pub state: AppState,
    events: Arc<EventRouter>,
    sweepers: CancellationToken,
}

impl Gateway {
    /// Wire the full component stack. Device-store connectivity failure here
    /// is fatal by design.
    pub async fn bootstrap(
        config: Config,
        factory: Arc<dyn ClientFactory>,
        metrics: MetricsHandle,
    ) -> anyhow::Result<Self> {
        let devices = Arc::new(SqliteDeviceStore::connect(&config.database_url).await?);

        let webhooks = Arc::new(Sender::new(
            &config.webhook_base,
            &config.signing_secret,
            config.webhook_timeout,
            RetryPolicy {
                max_retries: config.webhook_retry_max,
                backoff_base: config.webhook_retry_backoff_base,
            },
        )?);

        let events = EventRouter::new(Arc::clone(&webhooks) as _);
        let sessions = SessionManager::new(
            Arc::clone(&devices) as _,
            factory,
            Arc::clone(&events),
            SessionManagerConfig {
                idle_ttl: config.session_idle_ttl,
                reap_interval: REAP_INTERVAL,
                max_sessions: config.max_concurrent_sessions,
            },
        );

        let idempotency = IdempotencyStore::new();
        let send_limiter = Arc::new(SendRateLimiter::new(
            config.send_rate_per_minute,
            config.send_jitter_min_ms,
            config.send_jitter_max_ms,
        ));
        let sweepers = CancellationToken::new();
        idempotency.spawn_sweeper(sweepers.clone());
        send_limiter.spawn_sweeper(sweepers.clone());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                sessions,
                devices,
                webhooks,
                idempotency,
                send_limiter,
                metrics,
                http,
            },
            events,
            sweepers,
        })
    }

    #[must_use]
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Orderly teardown: drain sessions, stop delivery queues and sweepers,
    /// close the store.
    pub async fn shutdown(&self) {
        self.state.sessions.disconnect_all().await;
        self.events.shutdown();
        self.sweepers.cancel();
        self.state.devices.close().await;
    }
}

/// Run the gateway until SIGINT/SIGTERM, then drain and exit.
pub async fn run(config: Config, factory: Arc<dyn ClientFactory>) -> anyhow::Result<()> {
    let metrics = wagate_metrics::init_metrics()?;
    let port = config.port;
    let gateway = Gateway::bootstrap(config, factory, metrics).await?;
    let app = gateway.router();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let serve = {
        let shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
    };
    let serve = async move { serve.await };
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        () = async {
            shutdown.cancelled().await;
            tokio::time::sleep(DRAIN_DEADLINE).await;
        } => {
            warn!("drain deadline exceeded, closing remaining connections");
        }
    }

    gateway.shutdown().await;
    info!("server exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
