//! Beacon receiver.
//!
//! Wires the aggregation store, the live tail and gauge collation behind the
//! capture orchestrator, and serves the HTTP endpoints.

pub mod builder;
pub mod catalog;
pub mod endpoint;
pub mod http;

pub use builder::{Beacon, BeaconMetric, RecordBuilder};

use crate::capture::Capture;
use crate::core::{Config, PerfError, Result};
use crate::live::{LiveContext, LiveTail};
use crate::metrics::{GaugeExporter, InMemoryGauges};
use crate::storage::AggregationStore;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Fully assembled capture pipeline with its HTTP surface
pub struct BeaconReceiver {
    config: Config,
    capture: Arc<Capture>,
    gauges: Option<Arc<InMemoryGauges>>,
}

impl BeaconReceiver {
    /// Open every sink named by `config`
    pub fn from_config(config: Config) -> Result<Self> {
        let store = if config.capture.page_enabled || config.capture.resource_enabled {
            Some(Arc::new(AggregationStore::from_config(&config)?))
        } else {
            None
        };
        let live = if config.capture.live_enabled {
            LiveTail::open(&config.live, LiveContext::Server)
        } else {
            LiveTail::unavailable(&config.live, LiveContext::Server)
        };
        let gauges = config
            .capture
            .metrics_enabled
            .then(|| Arc::new(InMemoryGauges::default()));
        let exporter = gauges.clone().map(|g| g as Arc<dyn GaugeExporter>);
        let capture = Capture::new(&config, store, Arc::new(live), exporter)?;

        tracing::info!(
            backend = capture.store().map_or("disabled", |s| s.backend_name()),
            live_available = capture.live().available(),
            metrics = config.capture.metrics_enabled,
            "Capture pipeline ready"
        );

        Ok(Self {
            config,
            capture: Arc::new(capture),
            gauges,
        })
    }

    /// In-process gauges, present when metrics export is enabled
    pub fn gauges(&self) -> Option<&Arc<InMemoryGauges>> {
        self.gauges.as_ref()
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    pub fn router(&self) -> Router {
        http::create_http_router(
            &self.config.server,
            http::HttpState {
                capture: Arc::clone(&self.capture),
                default_site: self.config.server.default_site,
            },
        )
    }

    /// Address the server binds to
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.server.bind_address, self.config.server.http_port)
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr();
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            PerfError::Io(std::io::Error::new(e.kind(), format!("Failed to bind HTTP server to {}: {}", addr, e)))
        })?;

        tracing::info!(
            "Beacon receiver listening on {} (beacon {}, live {})",
            addr,
            self.config.server.beacon_path,
            self.config.server.live_path
        );

        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        tracing::info!("Beacon receiver stopped");
        Ok(())
    }
}
