use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    close_alert, create_definition, delete_definition, get_alert, health_check, ingest_metrics,
    list_alerts, list_definitions, list_states, stats, AppState,
};
use crate::alerting::{
    load_definitions, AlertAction, AlertNotification, AlertRegistry, AlertingActionService,
    LogAction, MetricSource, NotificationDispatcher, RegistrySyncAction, ThresholdChecker,
    WebhookAction,
};
use crate::metrics::{MetricStore, RetentionWorker};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub check_interval_secs: u64,
    /// Consecutive good checks needed to close an alert
    pub reset_checks: u32,
    pub retention_secs: u64,
    pub retention_check_interval_secs: u64,
    /// Maximum samples kept per series
    pub max_samples_per_series: usize,
    /// JSON file with the initial alerting definitions
    pub definitions_path: Option<PathBuf>,
    pub webhook_urls: Vec<String>,
    /// Extra headers sent with every webhook request
    pub webhook_headers: Vec<(String, String)>,
    /// Also send webhooks while an alert is ongoing
    pub notify_ongoing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            check_interval_secs: 10,
            reset_checks: 1,
            retention_secs: 3600,
            retention_check_interval_secs: 60,
            max_samples_per_series: 100_000,
            definitions_path: None,
            webhook_urls: vec![],
            webhook_headers: vec![],
            notify_ongoing: false,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Agent metrics
        .route("/metrics", post(ingest_metrics))
        // Alerting definitions
        .route("/definitions", get(list_definitions))
        .route("/definitions", post(create_definition))
        .route("/definitions/:id", delete(delete_definition))
        // Alerts
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/close", post(close_alert))
        .route("/states", get(list_states))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Wire the store, registry, actions and checker together
///
/// Webhook notifications are queued on `notifications` when given.
pub fn build_app_state(
    config: &ServerConfig,
    notifications: Option<mpsc::UnboundedSender<AlertNotification>>,
) -> Arc<AppState> {
    let store = Arc::new(MetricStore::with_series_limit(config.max_samples_per_series));
    let registry = Arc::new(AlertRegistry::new());

    let mut actions: Vec<Arc<dyn AlertAction>> = vec![
        Arc::new(LogAction),
        Arc::new(RegistrySyncAction::new(Arc::clone(&registry))),
    ];
    if let Some(sender) = notifications {
        actions.push(Arc::new(
            WebhookAction::new(sender).with_ongoing(config.notify_ongoing),
        ));
    }

    let service = Arc::new(AlertingActionService::new(Arc::clone(&registry), actions));
    let checker = Arc::new(
        ThresholdChecker::new(service, Arc::clone(&store) as Arc<dyn MetricSource>)
            .with_reset_checks(config.reset_checks),
    );

    Arc::new(AppState {
        store,
        registry,
        checker,
    })
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Webhook delivery runs on its own task
    let (notifications, dispatcher_handle) = if config.webhook_urls.is_empty() {
        (None, None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = config.webhook_headers.iter().fold(
            NotificationDispatcher::new(config.webhook_urls.clone()),
            |dispatcher, (key, value)| dispatcher.with_header(key.as_str(), value.as_str()),
        );
        let handle = dispatcher.start(rx);
        (Some(tx), Some(handle))
    };

    let state = build_app_state(&config, notifications);

    if let Some(path) = &config.definitions_path {
        for definition in load_definitions(path)? {
            state.checker.add_definition(definition)?;
        }
    }

    // Start background workers
    let checker_handle = Arc::clone(&state.checker)
        .start(Duration::from_secs(config.check_interval_secs));

    let retention_worker = Arc::new(RetentionWorker::new(
        Arc::clone(&state.store),
        Arc::clone(&state.registry),
        Duration::from_secs(config.retention_secs),
        Duration::from_secs(config.retention_check_interval_secs),
    ));
    let retention_handle = Arc::clone(&retention_worker).start();

    // Build router
    let app = build_router(Arc::clone(&state));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting Beacon server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            Arc::clone(&state.checker),
            retention_worker,
        ))
        .await?;

    // Wait for workers to stop
    checker_handle.abort();
    retention_handle.abort();
    if let Some(handle) = dispatcher_handle {
        handle.abort();
    }

    tracing::info!("Beacon server stopped");
    Ok(())
}

async fn shutdown_signal(checker: Arc<ThresholdChecker>, retention_worker: Arc<RetentionWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    checker.stop();
    retention_worker.stop();
}
