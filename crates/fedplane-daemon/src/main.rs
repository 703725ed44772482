mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::{Router, http::StatusCode, routing::get};
use fedplane_api::{HttpApi, TaskManagerAdapter};
use fedplane_core::{
    BuildContext, EventBus, MetricsBackend, StepRuntime, Subscribe, SupervisorApi, TaskManager,
    TaskStore,
    builder::{
        BeforeRetryInstallFederation, BeforeRetryRegisterSubCluster, BeforeRetryRemoveSubCluster,
        INSTALL_FEDERATION, REGISTER_SUB_CLUSTER, REMOVE_SUB_CLUSTER,
    },
    memory::{
        InventorySeed, MemoryClusterInventory, MemoryDocumentStore, MemoryFederationStore,
        StaticProjectService,
    },
};
use fedplane_exec::{
    CallbackRegistry, FlavorAdapters, HandlerRegistry, LocalRuntime, handlers::InventoryQuotaApi,
    register_builtin_callbacks, register_builtin_handlers,
};
use fedplane_observe::{Subscriber, SupervisorJournal, logger_init};
use fedplane_prometheus::PrometheusMetrics;
use fedplane_sync::{ControllerManager, SyncDeps, SyncError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = DaemonConfig::from_env()?;

    // 1) Logger
    logger_init(&cfg.logger)?;
    info!(format = %cfg.logger.format, level = %cfg.logger.level, "logger initialized");

    // 2) Collaborators
    let federations = MemoryFederationStore::new();
    let inventory = MemoryClusterInventory::new();
    let projects = StaticProjectService::new();
    if let Some(path) = &cfg.inventory {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory seed {}", path.display()))?;
        let seed: InventorySeed = serde_json::from_str(&raw)
            .with_context(|| format!("parsing inventory seed {}", path.display()))?;
        seed.apply(&federations, &inventory, &projects)?;
        info!(path = %path.display(), "inventory seed loaded");
    }
    let ctx = BuildContext::new(
        Arc::new(federations),
        Arc::new(inventory),
        Arc::new(projects),
    );

    // 3) Metrics + events
    let prometheus = PrometheusMetrics::new()?;
    let metrics: Arc<dyn MetricsBackend> = Arc::new(prometheus.clone());
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Subscriber::new())];
    let events = EventBus::new(subscribers);

    // 4) Supervisor: runs workflow executions and sync controllers
    let supervisor = SupervisorApi::new_default(vec![
        Arc::new(SupervisorJournal::new()) as Arc<dyn taskvisor::Subscribe>
    ])
    .await;

    // 5) Task store + runtime
    let store = Arc::new(TaskStore::new(Arc::new(MemoryDocumentStore::new())));
    let handlers = HandlerRegistry::new();
    register_builtin_handlers(
        &handlers,
        &ctx,
        FlavorAdapters::uniform(Arc::new(InventoryQuotaApi::new(ctx.inventory.clone()))),
    );
    let callbacks = CallbackRegistry::new();
    register_builtin_callbacks(&callbacks, ctx.federations.clone(), ctx.inventory.clone());
    info!(
        handlers = handlers.count(),
        callbacks = callbacks.count(),
        "step handlers registered"
    );
    let runtime: Arc<dyn StepRuntime> = Arc::new(
        LocalRuntime::builder(Arc::clone(&store), supervisor.clone())
            .with_handlers(handlers)
            .with_callbacks(callbacks)
            .with_events(events.clone())
            .with_metrics(Arc::clone(&metrics))
            .build(),
    );

    // 6) Task manager
    let manager = Arc::new(
        TaskManager::builder(Arc::clone(&store), runtime)
            .with_hook(
                INSTALL_FEDERATION,
                Arc::new(BeforeRetryInstallFederation::new(ctx.federations.clone())),
            )
            .with_hook(
                REGISTER_SUB_CLUSTER,
                Arc::new(BeforeRetryRegisterSubCluster::new(ctx.federations.clone())),
            )
            .with_hook(
                REMOVE_SUB_CLUSTER,
                Arc::new(BeforeRetryRemoveSubCluster::new(ctx.federations.clone())),
            )
            .with_events(events)
            .with_metrics(Arc::clone(&metrics))
            .build(),
    );
    info!("task manager ready");

    let cancel = CancellationToken::new();

    // 7) Sync controllers
    let deps = Arc::new(
        SyncDeps::new(Arc::clone(&manager), ctx, cfg.sync.instance.clone())
            .with_metrics(Arc::clone(&metrics)),
    );
    let controllers = tokio::spawn(
        ControllerManager::new(deps, cfg.sync.clone(), supervisor).run(cancel.clone()),
    );
    info!(
        instance = %cfg.sync.instance,
        sync_interval = ?cfg.sync.namespace_sync_interval,
        manager_interval = ?cfg.sync.manager_interval,
        "controller manager started"
    );

    // 8) HTTP: task API + /metrics
    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let prometheus = prometheus.clone();
                async move {
                    match prometheus.encode_text() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
            }),
        )
        .merge(
            HttpApi::new(Arc::new(TaskManagerAdapter::new(
                manager,
                cfg.sync.instance.clone(),
            )))
            .router(),
        );
    let listener = tokio::net::TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("binding {}", cfg.http_addr))?;
    info!(addr = %cfg.http_addr, "http api listening");
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
    });

    info!("press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down...");
    cancel.cancel();

    match controllers.await {
        Ok(Err(SyncError::Shutdown)) | Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "controller manager failed"),
        Err(e) => error!(error = %e, "controller manager panicked"),
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "http server exited with error"),
        Err(e) => error!(error = %e, "http server panicked"),
    }

    info!("stopped");
    Ok(())
}
