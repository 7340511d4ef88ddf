//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ledger_core::api::{RouterConfig, create_router_with_config};
use ledger_core::app::{AppState, SchedulerConfig, ServiceConfig, spawn_scheduler};
use ledger_core::domain::{IdempotencyStore, LockStore};
use ledger_core::infra::cache::connect as connect_redis;
use ledger_core::infra::{
    IdempotencyConfig, InMemoryIdempotencyStore, InMemoryLockStore, LockConfig, PostgresClient,
    PostgresConfig, RedisIdempotencyStore, RedisLockStore,
};

/// Application configuration
struct Config {
    database_url: SecretString,
    /// Shared lock / idempotency store. In-process stores are used when unset.
    redis_url: Option<SecretString>,
    host: String,
    port: u16,
    lock_config: LockConfig,
    idempotency_config: IdempotencyConfig,
    scheduler_config: SchedulerConfig,
    service_config: ServiceConfig,
    router_config: RouterConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let redis_url = env::var("REDIS_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .map(SecretString::from);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3001);

        Ok(Self {
            database_url: SecretString::from(database_url),
            redis_url,
            host,
            port,
            lock_config: LockConfig::from_env(),
            idempotency_config: IdempotencyConfig::from_env(),
            scheduler_config: SchedulerConfig::from_env(),
            service_config: ServiceConfig::from_env(),
            router_config: RouterConfig::from_env(),
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));
    let json = env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn build_stores(
    config: &Config,
) -> Result<(Arc<dyn LockStore>, Arc<dyn IdempotencyStore>)> {
    match &config.redis_url {
        Some(url) => {
            let conn = connect_redis(url.expose_secret())
                .await
                .context("Failed to connect to Redis")?;
            info!("   ✓ Redis lock and idempotency stores");
            Ok((
                Arc::new(RedisLockStore::new(conn.clone(), config.lock_config.clone())),
                Arc::new(RedisIdempotencyStore::new(
                    conn,
                    config.idempotency_config.clone(),
                )),
            ))
        }
        None => {
            info!("   ○ REDIS_URL not set, using in-process lock and idempotency stores");
            Ok((
                Arc::new(InMemoryLockStore::new(config.lock_config.clone())),
                Arc::new(InMemoryIdempotencyStore::new(
                    config.idempotency_config.clone(),
                )),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Ledger core v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let postgres_client =
        PostgresClient::new(config.database_url.expose_secret(), PostgresConfig::default())
            .await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");
    let postgres_client = Arc::new(postgres_client);

    let (lock_store, idempotency_store) = build_stores(&config).await?;

    let app_state = Arc::new(AppState::with_config(
        postgres_client.clone(),
        postgres_client,
        lock_store,
        idempotency_store,
        config.service_config.clone(),
    ));

    let scheduler = if config.scheduler_config.enabled {
        let (handle, shutdown_tx) = spawn_scheduler(
            Arc::clone(&app_state.scheduler),
            config.scheduler_config.clone(),
        );
        info!("   ✓ Event scheduler started");
        Some((handle, shutdown_tx))
    } else {
        info!("   ○ Event scheduler disabled");
        None
    };

    let router = create_router_with_config(app_state, config.router_config.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((handle, shutdown_tx)) = scheduler {
        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Event scheduler task failed");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
