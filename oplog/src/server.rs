//! Demo server hosting the audit interceptor.
//!
//! The interceptor is the outermost layer so it observes every request,
//! including ones whose handler panics.

use crate::audit::types::ResponseEnvelope;
use crate::audit::{audit_middleware, AuditInterceptor, AuditLogWriter, AuditLogWriterConfig};
use crate::common::error::{OplogError, OplogResult};
use crate::config::{AuditConfig, ServerConfig};
use crate::db::audit_log::AuditLogStorage;
use crate::db::endpoints::EndpointPatternStorage;
use crate::db::migrations::initialize_database;
use crate::registry::{EndpointRegistry, SqliteEndpointRegistry, StaticEndpointRegistry};
use axum::{
    body::Bytes,
    http::{Method, Uri},
    middleware,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

/// How long shutdown waits for the writer's final flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router with the interceptor attached.
pub fn create_app(interceptor: AuditInterceptor) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(echo)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(interceptor, audit_middleware))
        .layer(CatchPanicLayer::new())
}

async fn health() -> &'static str {
    "ok"
}

/// Echo the request back inside a [`ResponseEnvelope`].
async fn echo(method: Method, uri: Uri, body: Bytes) -> ResponseEnvelope {
    let body = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => value,
        Err(_) => serde_json::Value::String(String::from_utf8_lossy(&body).into_owned()),
    };
    ResponseEnvelope::payload(serde_json::json!({
        "method": method.as_str(),
        "path": uri.path(),
        "body": body,
    }))
}

/// Pick the endpoint registry: a catalog file when configured, the database otherwise.
async fn build_registry(
    config: &ServerConfig,
    pool: sqlx::SqlitePool,
) -> OplogResult<Arc<dyn EndpointRegistry>> {
    if let Some(file) = &config.endpoints_file {
        let registry = StaticEndpointRegistry::from_file(file)?;
        info!(file = %file, patterns = registry.len(), "Loaded endpoint catalog");
        return Ok(Arc::new(registry));
    }

    let registry = SqliteEndpointRegistry::load(EndpointPatternStorage::new(pool)).await?;
    registry.spawn_refresh(Duration::from_secs(config.endpoints_refresh_secs.max(1)));
    Ok(Arc::new(registry))
}

/// Run the demo server until Ctrl+C or SIGTERM, then drain the writer.
pub async fn run_server(config: ServerConfig, audit: AuditConfig) -> OplogResult<()> {
    let pool = initialize_database(&config.database_url).await?;
    let registry = build_registry(&config, pool.clone()).await?;

    let (writer, writer_task) = AuditLogWriter::spawn(
        Arc::new(AuditLogStorage::new(pool)),
        AuditLogWriterConfig::default(),
    );
    let app = create_app(AuditInterceptor::new(&audit, registry, Arc::new(writer)));

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| OplogError::Config(format!("Failed to bind {}: {}", bind_addr, e)))?;

    info!("oplog server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The router and its writer clones are gone; wait for the final flush.
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Operation log writer task failed: {}", e),
        Err(_) => warn!("Timed out waiting for operation log writer to drain"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
