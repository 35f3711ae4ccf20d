//! Shared reconciler scaffolding: the context handed to both the
//! environment and runner-pool controllers, and the diagnostics/metrics
//! state exposed by the operator's web server.

use crate::metrics::Metrics;

use chrono::{DateTime, Utc};
use kube::{client::Client, runtime::events::Reporter};
use prometheus_client::registry::Registry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Context handed to both the environment and runner-pool reconcilers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client.
    pub client: Client,
    /// Diagnostics read by the web server.
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics, shared across both controllers' sub-registries.
    pub metrics: Arc<Metrics>,
}

/// Diagnostics exposed by the web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "devstage-operator".into(),
        }
    }
}

/// State shared between both controllers and the web server. Owns the
/// combined Prometheus registry (HTTP client metrics plus both
/// controllers' reconcile metrics, registered by the caller before
/// construction) so `/metrics` serves one payload for the whole process.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
    registry: Arc<Registry>,
}

impl State {
    pub fn new(registry: Registry, metrics: Metrics) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Arc::new(metrics),
            registry: Arc::new(registry),
        }
    }

    /// Renders the Prometheus text-exposition payload for `/metrics`.
    pub fn metrics(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry).unwrap();
        buffer
    }

    /// Current diagnostics snapshot for `/health`.
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Builds a `Context` wired to this shared state for a given client.
    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}
