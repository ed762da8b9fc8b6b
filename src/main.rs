use anyhow::Result;
use axum::Router;
use futures::future::join_all;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

use bucket_store::{
    activity::DbActivityLogger,
    config::AppConfig,
    db::Database,
    dispatcher::Dispatcher,
    events::{EventRegistry, HandlerContext, TOPICS, resume_cascades},
    handlers::AppState,
    messaging::{Subscriber, memory::MemoryBroker},
    notify::LogNotifier,
    routes,
    storage::{ObjectStorage, lifecycle::LifecycleSweeper, local::LocalStorage, signing::UrlSigner},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting bucket-store with config: {:?}", redacted(&cfg));

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Database::connect(&cfg.database_url, 5).await?;

    // --- Handle migration mode ---
    db.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Wire the worker ---
    let signer = UrlSigner::new(&cfg.signing_secret)?;
    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(
        &cfg.storage_dir,
        &cfg.public_url,
        signer.clone(),
    ));
    let broker = MemoryBroker::new();
    // Queues start empty on every boot; pick up whatever was in flight.
    resume_cascades(&db, &broker).await?;
    let ctx = HandlerContext {
        db: db.clone(),
        storage: storage.clone(),
        publisher: Arc::new(broker.clone()),
        notifier: Arc::new(LogNotifier),
        activity: Arc::new(DbActivityLogger::new(db.pool().clone())),
        trash_retention_days: cfg.trash_retention_days,
        batch_limit: cfg.batch_limit,
    };
    let dispatcher = Dispatcher::new(Arc::new(EventRegistry::standard()), ctx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    // One sequential loop per topic; topics run side by side.
    for topic in TOPICS {
        let subscription = broker.subscribe(topic).await?;
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher.run(topic, subscription, shutdown).await;
        }));
    }

    let sweeper = LifecycleSweeper::new(
        storage.clone(),
        Arc::new(broker.clone()),
        cfg.trash_retention_days,
        cfg.batch_limit,
    );
    let interval = Duration::from_secs(cfg.lifecycle_interval_secs);
    let sweeper_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        sweeper.run(interval, sweeper_shutdown).await;
    }));

    // --- HTTP server ---
    let app: Router = routes::routes::routes().with_state(AppState {
        db: db.clone(),
        storage,
        signer,
    });

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("HTTP server listening on http://{}", listener.local_addr()?);
    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(err) => tracing::error!("Failed to listen for ctrl-c: {}", err),
        }
        let _ = shutdown_tx.send(true);
    });

    server.await?;
    join_all(tasks).await;
    tracing::info!("bucket-store stopped");

    Ok(())
}

/// Config as logged at startup, without the signing secret.
fn redacted(cfg: &AppConfig) -> AppConfig {
    AppConfig {
        signing_secret: if cfg.signing_secret.is_empty() {
            String::new()
        } else {
            "***".into()
        },
        ..cfg.clone()
    }
}
