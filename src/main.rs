use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

use axum::routing::get;
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use subscription_gateway::config::Config;
use subscription_gateway::context::Context;
use subscription_gateway::events::EventBus;
use subscription_gateway::services::memory::{
    InMemoryAccountabilityResolver, InMemoryAuthenticationService, MemoryItemsService,
    MemoryMetaService, PassthroughSanitizer, StaticSchemaResolver,
};
use subscription_gateway::state::GatewayState;
use subscription_gateway::websocket::websocket_upgrade;

/// Demo wiring for the bundled in-memory services — a real deployment
/// replaces every one of these with the host application's actual
/// `ItemsService`, `AccountabilityResolver`, etc (§1, §6).
fn demo_context(config: &Config) -> Context {
    let mut collections = HashSet::new();
    collections.insert("articles".to_string());
    collections.insert("directus_users".to_string());

    let demo_admin = Uuid::new_v4();
    let mut users = HashMap::new();
    users.insert(
        "admin@example.com".to_string(),
        ("password".to_string(), demo_admin),
    );
    let mut admins = HashSet::new();
    admins.insert(demo_admin);

    Context {
        bus: EventBus::new(),
        auth_service: Arc::new(InMemoryAuthenticationService {
            users,
            jwt_secret: config.jwt_secret.clone(),
            access_ttl_seconds: 900,
        }),
        accountability_resolver: Arc::new(InMemoryAccountabilityResolver {
            jwt_secret: config.jwt_secret.clone(),
            admins,
        }),
        schema_resolver: Arc::new(StaticSchemaResolver { collections }),
        items: Arc::new(MemoryItemsService::default()),
        meta: Arc::new(MemoryMetaService),
        sanitizer: Arc::new(PassthroughSanitizer),
    }
}

async fn health_check() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "subscription_gateway=info,tower_http=info".parse().unwrap());

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("subscription gateway starting");

    let config = Config::from_env().expect("Failed to load configuration");
    info!(auth_mode = %config.websockets_rest_auth, path = %config.websockets_rest_path, "configuration loaded");

    let context = demo_context(&config);
    let state = GatewayState::new(config, context);

    // The dispatcher pool (§2 "Event Bus"/§4.4): reacts to every data
    // mutation published on the bus by re-evaluating and pushing affected
    // subscriptions. Runs for the lifetime of the process.
    tokio::spawn(subscription_gateway::subscriptions::run_dispatch_loop(
        state.context.clone(),
        state.connections.clone(),
        state.registry.clone(),
    ));

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(move || async move { metric_handle.render() }))
        .route(&state.config.websockets_rest_path.clone(), get(websocket_upgrade))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = state.config.server_addr().parse().expect("Invalid SERVER_HOST/SERVER_PORT");
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server error");
}
