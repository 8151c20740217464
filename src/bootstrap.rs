use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use crate::{
    api::AppState,
    config::Config,
    error::AppResult,
    ledger::{LedgerStore, PgLedgerStore},
    provider::WhooingClient,
    reconcile::{ReconcilerConfig, SnapshotReconciler},
    schedule::{HttpWebhookSender, ScheduleMatcher, ScheduleTicker},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let local_offset = config.local_offset()?;

    // Accounting provider client
    let provider = Arc::new(WhooingClient::new(
        &config.provider_base_url,
        config.provider_timeout(),
    )?);
    info!("✅ Provider client initialized for {}", config.provider_base_url);

    let reconciler = Arc::new(SnapshotReconciler::new(
        store.clone(),
        provider,
        ReconcilerConfig {
            cooldown: config.refresh_cooldown(),
            lease_ttl: config.refresh_lease_ttl(),
            local_offset,
        },
    ));
    info!(
        "✅ Snapshot reconciler initialized (cooldown {:?}, lease ttl {:?})",
        config.refresh_cooldown(),
        config.refresh_lease_ttl()
    );

    let matcher = Arc::new(ScheduleMatcher::new(store.clone()));

    if config.schedule_enabled {
        let sender = Arc::new(HttpWebhookSender::new(config.webhook_timeout())?);
        let ticker = Arc::new(ScheduleTicker::new(matcher.clone(), sender, local_offset));
        ticker.start();
        info!("✅ Schedule ticker started (UTC offset {})", local_offset);
    } else {
        info!("⚠️  Schedule ticker disabled");
    }

    Ok(AppState {
        store,
        reconciler,
        matcher,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
