//! Health and metrics endpoint.
//!
//! Serves `/healthz`, `/readyz` and Prometheus text on `/metrics`.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Reconcile counters per resource kind
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    reconcile_errors: IntCounterVec,
    ready: AtomicBool,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> ControllerError {
    ControllerError::InvalidConfig(format!("metrics registry: {}", e))
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconciles = IntCounterVec::new(
            Opts::new("kaas_operator_reconciles_total", "Reconcile passes per resource kind"),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let reconcile_errors = IntCounterVec::new(
            Opts::new("kaas_operator_reconcile_errors_total", "Failed reconcile passes per resource kind"),
            &["kind"],
        )
        .map_err(metrics_error)?;
        registry.register(Box::new(reconciles.clone())).map_err(metrics_error)?;
        registry.register(Box::new(reconcile_errors.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconciles,
            reconcile_errors,
            ready: AtomicBool::new(false),
        })
    }

    pub fn reconciled(&self, kind: &str) {
        self.reconciles.with_label_values(&[kind]).inc();
    }

    pub fn reconcile_failed(&self, kind: &str) {
        self.reconcile_errors.with_label_values(&[kind]).inc();
    }

    pub fn reconcile_count(&self, kind: &str) -> u64 {
        self.reconciles.with_label_values(&[kind]).get()
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.reconcile_errors.with_label_values(&[kind]).get()
    }

    /// Marks the operator ready once the watchers are running.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::InvalidConfig(format!("metrics encoding: {}", e)))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> (StatusCode, &'static str) {
    if metrics.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> (StatusCode, String) {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serves the endpoint until the process exits.
pub async fn serve(bind_address: &str, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("Failed to bind to {}: {}", bind_address, e)))?;
    info!("Health and metrics server listening on {}", bind_address);

    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("Metrics server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics.reconciled("nodegroup");
        metrics.reconciled("nodegroup");
        metrics.reconcile_failed("cluster");

        assert_eq!(metrics.reconcile_count("nodegroup"), 2);
        assert_eq!(metrics.error_count("cluster"), 1);
        let text = metrics.render().unwrap();
        assert!(text.contains("kaas_operator_reconciles_total{kind=\"nodegroup\"} 2"));
        assert!(text.contains("kaas_operator_reconcile_errors_total{kind=\"cluster\"} 1"));
    }

    #[tokio::test]
    async fn test_readyz_follows_flag() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (status, _) = readyz(State(metrics.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        metrics.set_ready(true);
        let (status, _) = readyz(State(metrics)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
