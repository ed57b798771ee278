//! Prometheus gauge sink and the HTTP scrape endpoint serving it.

use crate::device::Cpm;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{IntGauge, Registry, TEXT_FORMAT, TextEncoder};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const GAUGE_NAME: &str = "geiger_cpm";
pub const GAUGE_HELP: &str = "Counts per minute from Geiger counter";

/// Errors from setting up or serving the metric endpoint.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to bind metrics endpoint on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

/// Destination for published readings.
///
/// `set` must be safe to call while the value is concurrently being read by
/// a scrape; implementations own whatever synchronization that needs.
pub trait CpmSink: Send + Sync {
    fn set(&self, cpm: Cpm);
}

/// A `geiger_cpm` gauge registered in its own registry.
#[derive(Clone)]
pub struct PrometheusSink {
    registry: Registry,
    gauge: IntGauge,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, SinkError> {
        let registry = Registry::new();
        let gauge = IntGauge::new(GAUGE_NAME, GAUGE_HELP)?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(PrometheusSink { registry, gauge })
    }

    /// The last published value (0 until the first successful reading).
    pub fn value(&self) -> i64 {
        self.gauge.get()
    }

    /// Encode the registry in the text exposition format.
    pub fn render(&self) -> Result<String, SinkError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }

    /// Router answering scrapes on `/` and `/metrics`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(scrape))
            .route("/metrics", get(scrape))
            .with_state(self.clone())
    }
}

impl CpmSink for PrometheusSink {
    fn set(&self, cpm: Cpm) {
        self.gauge.set(i64::from(cpm.value()));
    }
}

async fn scrape(State(sink): State<PrometheusSink>) -> Response {
    match sink.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            tracing::error!(%err, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind the scrape listener. Done before any device I/O so a port clash is
/// reported up front.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, SinkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| SinkError::Bind { addr, source })
}

/// Serve `router` on an already bound listener in the background.
pub fn spawn_server(listener: TcpListener, router: Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(%err, "Metrics endpoint stopped");
        }
    })
}
