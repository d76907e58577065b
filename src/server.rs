use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Extension, Router,
};
use http::{HeaderName, HeaderValue};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::info;

use crate::{
    api::handlers::{
        close_dispute, create_transaction, get_dispute, get_subscription_summary, get_summary,
        get_transaction, health_check, investigate_dispute, list_disputes, list_transactions,
        open_dispute, refund_transaction, release_transaction, resolve_dispute, AppState,
    },
    config::Config,
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

pub fn create_app(state: AppState, config: &Config) -> Router {
    info!("Setting up HTTP routes...");

    let rate_limit = Arc::new(RateLimitLayer::new(
        config.rate_limit_requests,
        config.rate_limit_window_secs,
    ));

    // Mutating escrow routes sit behind the rate limiter
    let mutations = Router::new()
        .route("/transactions", post(create_transaction))
        .route("/transactions/:id/release", post(release_transaction))
        .route("/transactions/:id/refund", post(refund_transaction))
        .route("/disputes", post(open_dispute))
        .route("/disputes/:id/investigate", post(investigate_dispute))
        .route("/disputes/:id/resolve", post(resolve_dispute))
        .route("/disputes/:id/close", post(close_dispute))
        .layer(axum_middleware::from_fn(rate_limit_middleware))
        .layer(Extension(rate_limit));

    let reads = Router::new()
        .route("/transactions", get(list_transactions))
        .route("/transactions/:id", get(get_transaction))
        .route("/disputes", get(list_disputes))
        .route("/disputes/:id", get(get_dispute))
        .route("/summary", get(get_summary))
        .route(
            "/subscriptions/:subscription_id/summary",
            get(get_subscription_summary),
        );

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/escrow", mutations.merge(reads))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.allowed_origins))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(CompressionLayer::new()),
        )
        .with_state(state);

    info!("HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
