mod api;
mod config;

use std::sync::Arc;

use axum::http::{Method, header};
use tower_http::cors::CorsLayer;

use chatrelay_ai::{HttpUpstreamClient, UpstreamClient};
use chatrelay_billing::{BillingApi, HttpBillingClient};
use chatrelay_core::{ChatOrchestrator, Notifier, spawn_retention_sweep};
use chatrelay_storage::ConversationStore;

use api::state::AppState;
use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing logger
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatrelay_server=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting ChatRelay gateway");

    let config = ServerConfig::load()?;

    let store = Arc::new(ConversationStore::new(&config.data_dir)?);
    let billing: Arc<dyn BillingApi> = Arc::new(HttpBillingClient::new(
        &config.billing_url,
        &config.billing_api_key,
    ));
    let upstream: Arc<dyn UpstreamClient> = Arc::new(
        HttpUpstreamClient::new(&config.upstream_url, &config.upstream_api_key)
            .with_model(&config.upstream_model),
    );
    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&billing),
        upstream,
        config.billing_strict,
    ));

    let notifier = Arc::new(Notifier::new(config.notify_url.clone()));
    spawn_retention_sweep(Arc::clone(&store), Arc::clone(&notifier), config.retention_days);
    notifier.send("ChatRelay gateway started").await;

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let state = AppState {
        orchestrator,
        store,
        billing,
    };
    let app = api::router(state).layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "ChatRelay listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
