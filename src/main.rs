//! Maintenance binary: prepares the database, seeds the catalog from config.toml and
//! delivers pending notifications once.

use tablefare::{
    config::{self, database},
    core::outbox::{self, TracingPublisher},
    errors::Result,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenvy::dotenv().ok();

    // 3. Engine settings and seed catalog
    let app_config = config::settings::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Database and schema
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database schema ready"))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Seed restaurants that do not exist yet
    let report = config::catalog::seed_catalog(&db, &app_config.restaurants).await?;
    info!(
        created = report.restaurants_created,
        skipped = report.restaurants_skipped,
        menu_items = report.menu_items_created,
        tables = report.tables_created,
        "Catalog seeding finished"
    );

    // 6. One outbox pass
    let drained =
        outbox::drain_outbox(&db, &TracingPublisher, app_config.engine.outbox_batch_size).await?;
    info!(
        delivered = drained.delivered,
        failed = drained.failed,
        "Outbox drained"
    );

    Ok(())
}
