//! Binary entrypoint for the AppServeApp lifecycle service.
use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use appserve_api::{build_router, AppState};
use appserve_api::config::ServiceConfig;
use appserve_api::db::init_db;
use appserve_api::repository::PgAppServeAppRepository;
use appserve_api::services::AppServeAppService;
use appserve_api::telemetry::{init_logging, normalize_path, HTTP_REQUESTS, HTTP_REQUEST_DURATION};
use appserve_api::workflow::ArgoWorkflowClient;
use axum::{http::{Request, HeaderValue}, middleware::{self, Next}, response::Response, body::Body};
use tower_http::{limit::RequestBodyLimitLayer, cors::CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB

async fn track_metrics(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path_label = normalize_path(req.uri().path());
    let req_id = Uuid::new_v4();
    req.extensions_mut().insert(req_id);
    let start = std::time::Instant::now();
    let mut resp = next.run(req).await;
    let status = resp.status();
    let outcome = if status.as_u16() < 400 { "success" } else { "error" };
    HTTP_REQUESTS.with_label_values(&[method.as_str(), path_label.as_str(), status.as_str(), outcome]).inc();
    HTTP_REQUEST_DURATION.with_label_values(&[method.as_str(), path_label.as_str()]).observe(start.elapsed().as_secs_f64());
    if let Ok(v) = HeaderValue::from_str(&req_id.to_string()) { resp.headers_mut().insert("x-request-id", v); }
    resp
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("APPSERVE_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    init_logging("info", json_logs);
    let cfg = ServiceConfig::load()?;
    let pool = init_db(&cfg.database_url).await.context("database must be available")?;
    let repo = Arc::new(PgAppServeAppRepository::new(pool));
    let argo = Arc::new(ArgoWorkflowClient::new(&cfg.argo_server_url, &cfg.argo_namespace)?);
    let state = AppState { apps: Arc::new(AppServeAppService::new(repo, argo, cfg.workflow.clone())) };

    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(track_metrics));
    let addr: SocketAddr = cfg.listen_addr.parse().with_context(|| format!("invalid listen address {}", cfg.listen_addr))?;
    info!(%addr, argo=%cfg.argo_server_url, namespace=%cfg.argo_namespace, "appserve-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await { warn!(error=%e, "ctrl_c handler failed"); }
        info!(target: "shutdown.signal", "received Ctrl+C");
        tokio::time::sleep(Duration::from_millis(200)).await; // drain window
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
