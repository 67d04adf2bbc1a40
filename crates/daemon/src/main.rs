use anyhow::Context;
use plugd::{
    api,
    config::DaemonConfig,
    db,
    driver::DeviceAdapter,
    http_driver::HttpDriver,
    Engine,
};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plugd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig::from_env().context("invalid configuration")?;

    // Initialize database
    info!(path = %config.db_path.display(), "Using database");
    let conn = db::init_db(&config.db_path).context("failed to initialize database")?;

    // Report reservations that survived a restart
    let existing = db::load_reservations(&conn).context("failed to load reservations")?;
    if !existing.is_empty() {
        info!(count = existing.len(), "Loaded existing reservation(s) from database");
    }
    for orphan in existing.iter().filter(|r| !config.registry.contains(&r.plug_id)) {
        warn!(plug = %orphan.plug_id, user = %orphan.user_id, "Reservation for unconfigured plug");
    }

    let driver = HttpDriver::new(config.device_timeout).context("failed to build device client")?;
    let devices = DeviceAdapter::new(Arc::new(driver), config.credentials.clone(), config.device_timeout);
    let engine = Engine::new(
        Arc::new(config.registry.clone()),
        Arc::new(Mutex::new(conn)),
        devices,
    );

    let app = api::router(engine);

    info!(addr = %config.listen, "Listening");
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    axum::serve(listener, app).await?;
    Ok(())
}
