use prometheus::{TextEncoder, Encoder, Registry, IntCounterVec, HistogramVec, HistogramOpts, opts};
use once_cell::sync::Lazy;
use axum::{response::IntoResponse, http::StatusCode};
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("http_requests_total", "HTTP request count"), &["method", "path", "status", "outcome"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(HistogramOpts::new("http_request_duration_seconds", "HTTP request duration seconds"), &["method", "path"]).unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});
pub static WORKFLOW_SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("appserve_workflow_submissions_total", "Workflow submissions by template"), &["template", "outcome"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static LIFECYCLE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("appserve_lifecycle_operations_total", "AppServeApp lifecycle operations"), &["operation", "outcome"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn record_lifecycle<T, E>(operation: &str, result: &Result<T, E>) {
    LIFECYCLE_OPERATIONS.with_label_values(&[operation, if result.is_ok() { "success" } else { "error" }]).inc();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type","text/plain; version=0.0.4")], buf).into_response()
}

/// Collapse ids in a request path so metric label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut prev = "";
    for seg in path.split('/') {
        let is_id = uuid::Uuid::parse_str(seg).is_ok() || (!seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()));
        let label = if is_id {
            ":id"
        } else if prev == "organizations" {
            ":organization_id"
        } else if prev == "name" {
            ":name"
        } else {
            seg
        };
        out.push(label);
        prev = seg;
    }
    out.join("/")
}

/// `RUST_LOG` filter, compact or JSON lines on stderr.
pub fn init_logging(default_level: &str, json: bool) {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let base = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let res = if json {
        tracing_subscriber::registry().with(env).with(base.json()).try_init()
    } else {
        tracing_subscriber::registry().with(env).with(base.compact()).try_init()
    };
    if let Err(e) = res { eprintln!("tracing already initialised: {e}"); }
}
