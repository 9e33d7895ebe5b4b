//! Prometheus exposition for operator processes.
//!
//! The recorder is global, so [`install_recorder`] succeeds once per process.
//! Everything recorded through the `metrics` macros afterwards, kafka client
//! statistics included, is rendered on `/metrics`.

use std::future::{ready, Future};
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response,
    routing::get, Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::{BuildError, PrometheusHandle};

pub const HTTP_REQUESTS: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_requests_duration_seconds";

/// Histogram buckets in seconds, from sub-millisecond handler calls up to
/// producer flushes that wait out their timeout.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    60.0,
];

pub fn install_recorder(buckets: &[f64]) -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(buckets)?
        .install_recorder()
}

/// `/metrics` rendering the given handle. Layer [`track_metrics`] over the final router.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || ready(handle.render())))
}

/// Serves `router` on `bind` until `shutdown` resolves.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Counts requests and records their latency, labelled by route and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |p| p.as_str().to_owned());

    let response = next.run(req).await;

    let labels = [
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, &labels).record(started.elapsed().as_secs_f64());
    response
}
