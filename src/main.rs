use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dispatchd::adapters::{AdapterRegistry, CustomAdapter};
use dispatchd::api::{api_routes, ApiState};
use dispatchd::budget::Governor;
use dispatchd::config::DaemonConfig;
use dispatchd::context::{Injector, PersonaLoader};
use dispatchd::hub::{ws_routes, Hub};
use dispatchd::notify::{Dispatcher, TelegramNotifier, WebhookFirer};
use dispatchd::queue::TaskQueue;
use dispatchd::scheduler::ScheduleEngine;
use dispatchd::store::{Database, LibSqlBackend};
use dispatchd::worker::{UnitDeps, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DaemonConfig::from_env();
    info!(
        port = config.port,
        db = %config.db_path.display(),
        "dispatchd {} starting",
        env!("CARGO_PKG_VERSION")
    );

    // ── Store ────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    // Reconcile claims orphaned by a previous process: stale `running`
    // tasks go back to `pending` with their checkpoints intact.
    let swept = db.reset_stale_running(config.stale_task_grace).await?;
    if swept > 0 {
        info!(count = swept, "Reset stale running tasks to pending");
    }

    // ── Hub & notifications ──────────────────────────────────────────
    let hub = Hub::new();

    let telegram = match (&config.telegram_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            info!(chat_id = %chat_id, "Telegram notifications enabled");
            Some(TelegramNotifier::new(token.clone(), chat_id.clone()))
        }
        _ => None,
    };
    let notify = Arc::new(Dispatcher::new(
        telegram,
        Some(WebhookFirer::new(Arc::clone(&db))),
    ));

    // ── Governor, context, adapters ──────────────────────────────────
    let governor = Arc::new(Governor::new(Arc::clone(&db), Arc::clone(&notify)));
    let injector = Arc::new(Injector::new(PersonaLoader::new(&config.persona_dir)));

    let workers = db.list_workers().await?;
    let mut registry = AdapterRegistry::with_builtins();
    for worker in &workers {
        if registry.get(&worker.cli_type).is_none() {
            info!(worker_id = worker.id, cli_type = %worker.cli_type, command = %worker.command,
                  "Registering custom adapter");
            registry.register(Arc::new(CustomAdapter::from_worker(worker)));
        }
    }
    let registry = Arc::new(registry);

    // ── Queue & pool ─────────────────────────────────────────────────
    let queue = TaskQueue::new(Arc::clone(&db));
    let deps = UnitDeps {
        db: Arc::clone(&db),
        queue: queue.clone(),
        registry,
        injector,
        governor,
        hub: hub.clone(),
        notify,
        config: config.clone(),
    };
    let pool = Arc::new(WorkerPool::new(deps));
    if workers.is_empty() {
        warn!("No workers configured yet — add them via the API");
    }
    pool.start_all(workers).await;

    // ── Scheduler ────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let scheduler = ScheduleEngine::new(Arc::clone(&db), queue.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    // ── HTTP server ──────────────────────────────────────────────────
    let state = ApiState {
        db,
        queue,
        pool: Arc::clone(&pool),
        hub: hub.clone(),
    };
    let app = api_routes(state)
        .merge(ws_routes(hub))
        .layer(tower_http::cors::CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "Listening");

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
        if let Err(e) = server.await {
            warn!(error = %e, "HTTP server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // ── Graceful shutdown ────────────────────────────────────────────
    shutdown.cancel();
    pool.stop_all().await;
    let _ = scheduler_handle.await;
    let _ = server_handle.await;
    info!("dispatchd stopped");

    Ok(())
}
