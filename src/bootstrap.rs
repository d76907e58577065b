use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::watch;
use tracing::info;

use crate::{
    api::handlers::AppState,
    config::Config,
    dispute::DisputeWorkflow,
    error::AppResult,
    escrow::{AutoApproveGateway, HttpPaymentGateway, PaymentGateway, TransactionStateMachine},
    events::{spawn_notifier, EventBus},
    ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore},
    scheduler::{ReleaseScheduler, SchedulerConfig},
};

pub struct App {
    pub state: AppState,
    pub scheduler: Arc<ReleaseScheduler>,
    pub shutdown: watch::Sender<bool>,
}

pub async fn initialize_app(config: &Config) -> AppResult<App> {
    info!("Initializing application components...");

    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            let pool = initialize_database(url).await?;
            Arc::new(PgLedgerStore::new(pool))
        }
        None => {
            info!("DATABASE_URL not set - using in-memory ledger store");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match &config.payment_gateway_url {
        Some(url) => {
            info!("Payment gateway: {}", url);
            Arc::new(HttpPaymentGateway::new(url.clone()))
        }
        None => {
            info!("PAYMENT_GATEWAY_URL not set - auto-approving charges up to the cap");
            Arc::new(AutoApproveGateway::new(config.max_charge))
        }
    };

    let events = EventBus::default();
    let _notifier = spawn_notifier(&events);
    info!("Event notifier started");

    let machine = Arc::new(TransactionStateMachine::new(
        store.clone(),
        gateway,
        events.clone(),
        config.escrow_fee_rate,
    ));

    let disputes = Arc::new(DisputeWorkflow::new(
        store.clone(),
        machine.clone(),
        events.clone(),
    ));

    let scheduler = Arc::new(ReleaseScheduler::new(
        SchedulerConfig {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        },
        store.clone(),
        machine.clone(),
    ));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let _sweeper = scheduler.clone().start(shutdown_rx);
    info!(
        "Release scheduler started (sweep every {}s)",
        config.sweep_interval_secs
    );

    Ok(App {
        state: AppState {
            store,
            machine,
            disputes,
        },
        scheduler,
        shutdown,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}
