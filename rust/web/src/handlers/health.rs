use crate::metrics::MetricsCollector;
use serde::Serialize;
use warp::reply::Json;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

pub fn health() -> Json {
    warp::reply::json(&HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/metrics`
pub fn metrics(collector: MetricsCollector) -> Json {
    warp::reply::json(&collector.snapshot())
}
