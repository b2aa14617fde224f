use axum::{Json, http::StatusCode, extract::{State, Path, Query}};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use crate::{AppState, error::ApiResult};
use crate::models::{AppServeApp, AppServeAppTask, AppType, NewAppServeApp, ServeType, TaskSpec, TaskStatus};

/// Task fields sit at the top level of the body, next to the app attributes.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateAppServeAppRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub serve_type: ServeType,
    pub app_type: AppType,
    pub target_cluster_id: String,
    #[serde(flatten)]
    pub task: TaskSpec,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateAppServeAppResponse { pub id: Uuid, pub name: String }

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AckResponse { pub message: String }

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery { pub show_all: Option<bool> }

#[derive(Debug, Deserialize, ToSchema)]
pub struct RollbackRequest { pub task_id: Uuid }

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest { pub task_id: Uuid, pub status: String, #[serde(default)] pub output: String }

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateEndpointRequest { pub endpoint_url: Option<String>, pub preview_endpoint_url: Option<String> }

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NameExistenceResponse { pub existed: bool }

fn accepted(message: String) -> (StatusCode, Json<AckResponse>) { (StatusCode::ACCEPTED, Json(AckResponse { message })) }

/// Create app-serve app (initial build/deploy)
#[utoipa::path(post, path = "/api/1.0/organizations/{organization_id}/app-serve-apps", request_body = CreateAppServeAppRequest,
    params(("organization_id" = String, Path, description = "Organization")),
    responses( (status=201, body=CreateAppServeAppResponse), (status=400, body=crate::error::ApiErrorBody), (status=409, body=crate::error::ApiErrorBody), (status=502, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state, req), fields(app_name=%req.name))]
pub async fn create_app_serve_app(State(state): State<AppState>, Path(organization_id): Path<String>, Json(req): Json<CreateAppServeAppRequest>) -> ApiResult<(StatusCode, Json<CreateAppServeAppResponse>)> {
    let new_app = NewAppServeApp {
        organization_id,
        name: req.name,
        serve_type: req.serve_type,
        app_type: req.app_type,
        target_cluster_id: req.target_cluster_id,
        task: req.task,
    };
    let (id, name) = state.apps.create(new_app).await?;
    Ok((StatusCode::CREATED, Json(CreateAppServeAppResponse { id, name })))
}

/// List app-serve apps of an organization
#[utoipa::path(get, path = "/api/1.0/organizations/{organization_id}/app-serve-apps",
    params(("organization_id" = String, Path, description = "Organization"), ("show_all" = Option<bool>, Query, description = "Include deleted apps")),
    responses( (status=200, body=[AppServeApp]) ))]
#[tracing::instrument(level="debug", skip(state))]
pub async fn list_app_serve_apps(State(state): State<AppState>, Path(organization_id): Path<String>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<AppServeApp>>> {
    Ok(Json(state.apps.list(&organization_id, q.show_all.unwrap_or(false)).await?))
}

/// Get app-serve app with its task history
#[utoipa::path(get, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=200, body=AppServeApp), (status=404, body=crate::error::ApiErrorBody) ))]
pub async fn get_app_serve_app(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>) -> ApiResult<Json<AppServeApp>> {
    Ok(Json(state.apps.get(&organization_id, app_id).await?))
}

/// Check whether an app name is taken in the organization
#[utoipa::path(get, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/name/{name}/existence",
    params(("organization_id" = String, Path, description = "Organization"), ("name" = String, Path, description = "App name")),
    responses( (status=200, body=NameExistenceResponse) ))]
pub async fn app_name_existence(State(state): State<AppState>, Path((organization_id, name)): Path<(String, String)>) -> ApiResult<Json<NameExistenceResponse>> {
    Ok(Json(NameExistenceResponse { existed: state.apps.name_exists(&organization_id, &name).await? }))
}

/// Deploy a new version of an app-serve app
#[utoipa::path(put, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}", request_body = TaskSpec,
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=202, body=AckResponse), (status=400, body=crate::error::ApiErrorBody), (status=404, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state, spec))]
pub async fn update_app_serve_app(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>, Json(spec): Json<TaskSpec>) -> ApiResult<(StatusCode, Json<AckResponse>)> {
    Ok(accepted(state.apps.update(&organization_id, app_id, spec).await?))
}

/// Tear down an app-serve app
#[utoipa::path(delete, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=202, body=AckResponse), (status=404, body=crate::error::ApiErrorBody), (status=409, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state))]
pub async fn delete_app_serve_app(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>) -> ApiResult<(StatusCode, Json<AckResponse>)> {
    Ok(accepted(state.apps.delete(&organization_id, app_id).await?))
}

/// Promote a staged blue/green version
#[utoipa::path(post, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/promote",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=202, body=AckResponse), (status=409, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state))]
pub async fn promote_app_serve_app(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>) -> ApiResult<(StatusCode, Json<AckResponse>)> {
    Ok(accepted(state.apps.promote(&organization_id, app_id).await?))
}

/// Abort a staged or failed blue/green version
#[utoipa::path(post, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/abort",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=202, body=AckResponse), (status=409, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state))]
pub async fn abort_app_serve_app(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>) -> ApiResult<(StatusCode, Json<AckResponse>)> {
    Ok(accepted(state.apps.abort(&organization_id, app_id).await?))
}

/// Redeploy the snapshot of an earlier task
#[utoipa::path(post, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/rollback", request_body = RollbackRequest,
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=202, body=AckResponse), (status=404, body=crate::error::ApiErrorBody), (status=409, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state, req), fields(target_task_id=%req.task_id))]
pub async fn rollback_app_serve_app(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>, Json(req): Json<RollbackRequest>) -> ApiResult<(StatusCode, Json<AckResponse>)> {
    Ok(accepted(state.apps.rollback(&organization_id, app_id, req.task_id).await?))
}

/// Workflow callback: task status/output
#[utoipa::path(patch, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/status", request_body = UpdateStatusRequest,
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=204, description="Recorded"), (status=404, body=crate::error::ApiErrorBody) ))]
#[tracing::instrument(level="info", skip(state, req), fields(task_id=%req.task_id, status=%req.status))]
pub async fn update_app_serve_app_status(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>, Json(req): Json<UpdateStatusRequest>) -> ApiResult<StatusCode> {
    state.apps.update_status(&organization_id, app_id, req.task_id, TaskStatus::from(req.status), &req.output).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Workflow callback: exposed endpoint URLs
#[utoipa::path(patch, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/endpoint", request_body = UpdateEndpointRequest,
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=204, description="Recorded"), (status=400, body=crate::error::ApiErrorBody), (status=404, body=crate::error::ApiErrorBody) ))]
pub async fn update_app_serve_app_endpoint(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>, Json(req): Json<UpdateEndpointRequest>) -> ApiResult<StatusCode> {
    state.apps.update_endpoint(&organization_id, app_id, req.endpoint_url.as_deref(), req.preview_endpoint_url.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Task history, newest first
#[utoipa::path(get, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/tasks",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=200, body=[AppServeAppTask]), (status=404, body=crate::error::ApiErrorBody) ))]
pub async fn list_app_serve_app_tasks(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>) -> ApiResult<Json<Vec<AppServeAppTask>>> {
    Ok(Json(state.apps.tasks(&organization_id, app_id).await?))
}

#[utoipa::path(get, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/latest-task",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id")),
    responses( (status=200, body=AppServeAppTask), (status=404, body=crate::error::ApiErrorBody) ))]
pub async fn latest_app_serve_app_task(State(state): State<AppState>, Path((organization_id, app_id)): Path<(String, Uuid)>) -> ApiResult<Json<AppServeAppTask>> {
    Ok(Json(state.apps.latest_task(&organization_id, app_id).await?))
}

#[utoipa::path(get, path = "/api/1.0/organizations/{organization_id}/app-serve-apps/{app_id}/tasks/{task_id}",
    params(("organization_id" = String, Path, description = "Organization"), ("app_id" = Uuid, Path, description = "App id"), ("task_id" = Uuid, Path, description = "Task id")),
    responses( (status=200, body=AppServeAppTask), (status=404, body=crate::error::ApiErrorBody) ))]
pub async fn get_app_serve_app_task(State(state): State<AppState>, Path((organization_id, app_id, task_id)): Path<(String, Uuid, Uuid)>) -> ApiResult<Json<AppServeAppTask>> {
    Ok(Json(state.apps.task(&organization_id, app_id, task_id).await?))
}
