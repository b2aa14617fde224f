//! AppServeApp lifecycle service: HTTP router, orchestrator, task ledger
//! storage and Argo workflow dispatch.
//!
//! `test_support` is a harness for this crate's own tests (in-memory state,
//! optional Postgres pool); it is public only so `tests/` can reach it.
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod services;
pub mod telemetry;
#[doc(hidden)]
pub mod test_support;
pub mod workflow;

use std::sync::Arc;
use axum::{Router, routing::{get, post, patch}};
use handlers::{health::health, readiness::readiness, app_serve::*};
use services::AppServeAppService;
use utoipa::OpenApi;
use crate::telemetry::metrics_handler;

#[derive(Clone)]
pub struct AppState { pub apps: Arc<AppServeAppService> }

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::readiness::readiness,
        handlers::app_serve::create_app_serve_app,
        handlers::app_serve::list_app_serve_apps,
        handlers::app_serve::get_app_serve_app,
        handlers::app_serve::app_name_existence,
        handlers::app_serve::update_app_serve_app,
        handlers::app_serve::delete_app_serve_app,
        handlers::app_serve::promote_app_serve_app,
        handlers::app_serve::abort_app_serve_app,
        handlers::app_serve::rollback_app_serve_app,
        handlers::app_serve::update_app_serve_app_status,
        handlers::app_serve::update_app_serve_app_endpoint,
        handlers::app_serve::list_app_serve_app_tasks,
        handlers::app_serve::latest_app_serve_app_task,
        handlers::app_serve::get_app_serve_app_task,
    ),
    components(schemas(
        error::ApiErrorBody,
        models::AppServeApp, models::AppServeAppTask, models::TaskSpec, models::PersistentVolume,
        models::ServeType, models::AppType, models::Strategy,
        handlers::app_serve::CreateAppServeAppRequest, handlers::app_serve::CreateAppServeAppResponse,
        handlers::app_serve::AckResponse, handlers::app_serve::RollbackRequest,
        handlers::app_serve::UpdateStatusRequest, handlers::app_serve::UpdateEndpointRequest,
        handlers::app_serve::NameExistenceResponse,
    )),
    tags( (name = "appserve", description = "AppServeApp lifecycle API") )
)]
pub struct ApiDoc;

const APPS_PREFIX: &str = "/api/1.0/organizations/:organization_id/app-serve-apps";

pub fn build_router(state: AppState) -> Router {
    let openapi = ApiDoc::openapi();
    let apps = Router::new()
        .route("/", post(create_app_serve_app).get(list_app_serve_apps))
        .route("/name/:name/existence", get(app_name_existence))
        .route("/:app_id", get(get_app_serve_app).put(update_app_serve_app).delete(delete_app_serve_app))
        .route("/:app_id/promote", post(promote_app_serve_app))
        .route("/:app_id/abort", post(abort_app_serve_app))
        .route("/:app_id/rollback", post(rollback_app_serve_app))
        .route("/:app_id/status", patch(update_app_serve_app_status))
        .route("/:app_id/endpoint", patch(update_app_serve_app_endpoint))
        .route("/:app_id/tasks", get(list_app_serve_app_tasks))
        .route("/:app_id/tasks/:task_id", get(get_app_serve_app_task))
        .route("/:app_id/latest-task", get(latest_app_serve_app_task));
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readiness))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(|| async move { axum::Json(openapi.clone()) }))
        .nest(APPS_PREFIX, apps)
        .with_state(state)
}
