//! Service entry point: wire configuration, pools, queue, worker,
//! notifier and the HTTP server together, then serve until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use mailflow::config::AppConfig;
use mailflow::email::{ConsoleBackend, EmailSender, SmtpBackend};
use mailflow::handlers;
use mailflow::jobs::{DelayedQueue, DispatchWorker, PgStatusStore, RetryPolicy};
use mailflow::notify::StatusNotifier;
use mailflow::observability;
use mailflow::scheduling::ScheduleThrottle;
use mailflow::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init()?;
    let config = AppConfig::load().context("failed to load configuration")?;

    info!("initializing services");

    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to PostgreSQL")?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("failed to run migrations")?;

    let redis = deadpool_redis::Config::from_url(&config.redis.url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("failed to create Redis pool")?;

    let retry = RetryPolicy::new(
        config.queue.max_attempts,
        Duration::from_secs(config.queue.backoff_base_secs),
    );
    let queue = Arc::new(DelayedQueue::new(
        config.queue.name.clone(),
        retry,
        Some(redis.clone()),
    ));
    match queue.restore().await {
        Ok(restored) if restored > 0 => info!(restored, "restored scheduled jobs from Redis"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "could not restore scheduled jobs, starting empty"),
    }

    let sender: Arc<dyn EmailSender> = if config.smtp.is_configured() {
        Arc::new(SmtpBackend::new(&config.smtp).context("failed to build SMTP transport")?)
    } else {
        warn!("SMTP credentials not configured, emails go to the log");
        Arc::new(ConsoleBackend::new())
    };

    let worker = DispatchWorker::new(
        queue.clone(),
        sender,
        Arc::new(PgStatusStore::new(db.clone())),
        config.queue.concurrency,
        Duration::from_secs(config.queue.send_timeout_secs),
    )
    .spawn();

    let notifier = Arc::new(StatusNotifier::new());
    let listener = notifier.spawn_listener(queue.subscribe());

    let throttle = ScheduleThrottle::new(redis, config.rate_limit.clone());
    let state = AppState::new(config.clone(), db, queue, throttle, notifier);
    let app = handlers::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "server started");

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    worker.shutdown().await;
    listener.shutdown();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
