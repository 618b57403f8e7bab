//! Process startup: tracing, storage backends and the connection supervisor.

use std::sync::Arc;
use std::time::Duration;

use event_bus::Backoff;
use saga::{Backends, InMemoryPaymentGateway, Storefront};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use version_store::StoreError;

use crate::config::{Config, LogFormat};
use crate::routes::AppState;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database unreachable after {attempts} attempts: {source}")]
    DatabaseUnreachable {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration failed: {0}")]
    Migration(#[from] StoreError),

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Connects to PostgreSQL, retrying with exponential backoff.
///
/// Gives up after `max_attempts` failed connections.
pub async fn connect_with_retry(
    url: &str,
    max_attempts: u32,
    mut backoff: Backoff,
) -> Result<PgPool, StartupError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
        {
            Ok(pool) => {
                tracing::info!(attempt, "connected to database");
                return Ok(pool);
            }
            Err(source) if attempt >= max_attempts => {
                return Err(StartupError::DatabaseUnreachable {
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(attempt, max_attempts, ?delay, error = %e, "database not ready, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Builds the storefront over PostgreSQL when `DATABASE_URL` is set, and
/// over in-memory backends otherwise.
pub async fn build_state(config: &Config) -> Result<Arc<AppState>, StartupError> {
    let storefront_config = config.storefront();
    let gateway = Arc::new(InMemoryPaymentGateway::new());

    let (backends, backend) = match &config.database_url {
        Some(url) => {
            let pool = connect_with_retry(
                url,
                config.startup_max_attempts,
                Backoff::new(Duration::from_millis(250), Duration::from_secs(10)),
            )
            .await?;
            version_store::run_migrations(&pool).await?;
            tracing::info!("database migrations applied");
            (Backends::postgres(pool), "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            (Backends::in_memory(), "memory")
        }
    };

    Ok(Arc::new(AppState {
        storefront: Storefront::new(backends, gateway, storefront_config),
        backend,
    }))
}
