use escrow_ledger::{bootstrap, config::Config, server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,escrow_ledger=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("Starting escrow ledger service");

    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    let app = bootstrap::initialize_app(&config).await?;
    let router = server::create_app(app.state, &config);

    let shutdown = app.shutdown;
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown.send(true);
        }
    });

    server::run_server(router, &config.bind_address, server_shutdown).await?;

    info!("Server stopped");
    Ok(())
}
