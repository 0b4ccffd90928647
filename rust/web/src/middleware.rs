use crate::metrics::MetricsCollector;
use std::time::Instant;
use warp::http::{Method, StatusCode};
use warp::path::FullPath;
use warp::reject::Rejection;
use warp::reply::Response;
use warp::Filter;

/// How a finished request is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Served,
    Rejected,
    Failed,
}

impl Outcome {
    pub fn of(status: StatusCode) -> Self {
        if status.is_server_error() {
            Outcome::Failed
        } else if status.is_client_error() {
            Outcome::Rejected
        } else {
            Outcome::Served
        }
    }
}

/// A request in flight, captured before the inner routes run.
#[derive(Debug, Clone)]
struct InFlight {
    started: Instant,
    route: String,
    method: Method,
}

impl InFlight {
    fn begin(path: FullPath, method: Method) -> Self {
        tracing::debug!(route = path.as_str(), %method, "request received");
        Self {
            started: Instant::now(),
            route: path.as_str().to_owned(),
            method,
        }
    }

    fn finish(self, status: StatusCode, metrics: &MetricsCollector) {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = Outcome::of(status);
        report(outcome, status, self.method.as_str(), &self.route, elapsed_ms);
        metrics.record_request(elapsed_ms, outcome != Outcome::Failed);
    }
}

/// Wrap the lobby routes so every response is logged and counted.
pub fn with_request_logging<F>(
    routes: F,
    metrics: MetricsCollector,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone
where
    F: Filter<Extract = (Response,), Error = Rejection> + Clone + Send + Sync + 'static,
{
    warp::path::full()
        .and(warp::method())
        .map(InFlight::begin)
        .and(routes)
        .map(move |in_flight: InFlight, response: Response| {
            in_flight.finish(response.status(), &metrics);
            response
        })
}

/// Emit the one summary line per request.
pub fn report(outcome: Outcome, status: StatusCode, method: &str, route: &str, elapsed_ms: u64) {
    macro_rules! summary {
        ($level:expr, $message:literal) => {
            tracing::event!(
                $level,
                status = status.as_u16(),
                method,
                route,
                elapsed_ms,
                $message
            )
        };
    }

    match outcome {
        Outcome::Served => summary!(tracing::Level::INFO, "request served"),
        Outcome::Rejected => summary!(tracing::Level::WARN, "request rejected"),
        Outcome::Failed => summary!(tracing::Level::ERROR, "request failed"),
    }
}
