use appserve_api::{build_router, test_support::memory_state};
use axum::{body::Body, http::{Request, StatusCode}, Router};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const BASE: &str = "/api/1.0/organizations/org-1/app-serve-apps";

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => { req = req.header("content-type", "application/json"); Body::from(v.to_string()) }
        None => Body::empty(),
    };
    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    let v = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, v)
}

fn create_body(name: &str, strategy: &str) -> Value {
    json!({
        "name": name,
        "type": "all",
        "app_type": "springboot",
        "target_cluster_id": "c-1",
        "version": "1.0",
        "strategy": strategy,
        "artifact_url": "https://nexus.local/repo/web-1.0.jar",
        "port": "8080",
        "pv": { "enabled": false }
    })
}

async fn create(app: &Router, name: &str, strategy: &str) -> String {
    let (status, v) = call(app, "POST", BASE, Some(create_body(name, strategy))).await;
    assert_eq!(status, StatusCode::CREATED, "{v}");
    v["id"].as_str().unwrap().to_string()
}

async fn report(app: &Router, app_id: &str, task_id: &str, status: &str) {
    let (code, v) = call(app, "PATCH", &format!("{BASE}/{app_id}/status"), Some(json!({"task_id": task_id, "status": status, "output": "ok"}))).await;
    assert_eq!(code, StatusCode::NO_CONTENT, "{v}");
}

async fn latest_task_id(app: &Router, app_id: &str) -> String {
    let (_, v) = call(app, "GET", &format!("{BASE}/{app_id}/latest-task"), None).await;
    v["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_derives_image_and_dispatches_serve_workflow() {
    let (state, _, argo) = memory_state();
    let app = build_router(state);
    let (status, v) = call(&app, "POST", BASE, Some(create_body("web", ""))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(v["name"], "web");

    let sub = argo.last().unwrap();
    assert_eq!(sub.template, "serve-java-app");
    assert_eq!(sub.options.get("image_url"), Some("harbor.local/apps/web:1.0"));
    assert_eq!(sub.options.get("executable_path"), Some("/usr/src/myapp/web-1.0.jar"));
    assert_eq!(sub.options.get("strategy"), Some("rolling-update"));
    assert_eq!(sub.options.get("asa_id"), v["id"].as_str());

    let (status, got) = call(&app, "GET", &format!("{BASE}/{}", v["id"].as_str().unwrap()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got["status"], "PREPARING");
    assert_eq!(got["tasks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_rejects_bad_strategy_and_missing_artifact() {
    let (state, repo, argo) = memory_state();
    let app = build_router(state);
    let (status, v) = call(&app, "POST", BASE, Some(create_body("web", "big-bang"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["code"], "bad_request");

    let mut body = create_body("web", "canary");
    body["artifact_url"] = json!("");
    let (status, _) = call(&app, "POST", BASE, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(repo.task_count(), 0);
    assert!(argo.submissions().is_empty());
}

#[tokio::test]
async fn duplicate_name_conflicts_and_existence_reports_it() {
    let (state, _, _) = memory_state();
    let app = build_router(state);
    let (_, v) = call(&app, "GET", &format!("{BASE}/name/web/existence"), None).await;
    assert_eq!(v, json!({"existed": false}));
    create(&app, "web", "canary").await;
    let (_, v) = call(&app, "GET", &format!("{BASE}/name/web/existence"), None).await;
    assert_eq!(v, json!({"existed": true}));
    let (status, v) = call(&app, "POST", BASE, Some(create_body("web", "canary"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(v["code"], "conflict");
}

#[tokio::test]
async fn blue_green_promote_flow() {
    let (state, _, argo) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "blue-green").await;

    let (status, v) = call(&app, "POST", &format!("{BASE}/{id}/promote"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(v["code"], "precondition_failed");

    let task = latest_task_id(&app, &id).await;
    report(&app, &id, &task, "WAIT_FOR_PROMOTE").await;

    let (status, _) = call(&app, "DELETE", &format!("{BASE}/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, v) = call(&app, "POST", &format!("{BASE}/{id}/promote"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(v["message"].as_str().unwrap().contains("promoted"));
    let sub = argo.last().unwrap();
    assert_eq!(sub.template, "promote-java-app");
    assert_eq!(sub.options.get("asa_task_id"), Some(task.as_str()));

    let (_, tasks) = call(&app, "GET", &format!("{BASE}/{id}/tasks"), None).await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn abort_allowed_after_bluegreen_failure() {
    let (state, _, argo) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "blue-green").await;
    let task = latest_task_id(&app, &id).await;
    report(&app, &id, &task, "BLUEGREEN_FAILED").await;
    let (status, v) = call(&app, "POST", &format!("{BASE}/{id}/abort"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{v}");
    assert_eq!(argo.last().unwrap().template, "abort-java-app");
}

#[tokio::test]
async fn update_then_rollback_replays_first_version() {
    let (state, _, argo) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "rolling-update").await;
    let first = latest_task_id(&app, &id).await;
    report(&app, &id, &first, "DEPLOY_SUCCESS").await;

    let update = json!({"version": "2.0", "strategy": "rolling-update", "artifact_url": "https://nexus.local/repo/web-2.0.jar", "port": "8080"});
    let (status, _) = call(&app, "PUT", &format!("{BASE}/{id}"), Some(update)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(argo.last().unwrap().options.get("image_url"), Some("harbor.local/apps/web:2.0"));

    let (status, v) = call(&app, "POST", &format!("{BASE}/{id}/rollback"), Some(json!({"task_id": first}))).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{v}");
    let sub = argo.last().unwrap();
    assert_eq!(sub.template, "serve-java-app");
    assert_eq!(sub.options.get("image_url"), Some("harbor.local/apps/web:1.0"));

    let (_, tasks) = call(&app, "GET", &format!("{BASE}/{id}/tasks"), None).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0]["version"], "1.0");
    assert_eq!(tasks[0]["status"], "PREPARING");
}

#[tokio::test]
async fn update_requires_valid_strategy() {
    let (state, repo, _) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "canary").await;
    let (status, _) = call(&app, "PUT", &format!("{BASE}/{id}"), Some(json!({"version": "2.0"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(repo.task_count(), 1);
}

#[tokio::test]
async fn dispatch_failure_is_bad_gateway_and_task_remains() {
    let (state, repo, argo) = memory_state();
    let app = build_router(state);
    argo.fail_with(Some("argo unreachable"));
    let (status, v) = call(&app, "POST", BASE, Some(create_body("web", "canary"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["code"], "workflow_dispatch_failed");
    assert_eq!(repo.task_count(), 1);

    let (_, list) = call(&app, "GET", BASE, None).await;
    let orphan = list[0]["tasks"][0]["id"].as_str().unwrap();
    assert!(v["message"].as_str().unwrap().contains(orphan), "{v}");
}

#[tokio::test]
async fn delete_hides_app_once_reported_done() {
    let (state, _, argo) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "canary").await;
    let (status, _) = call(&app, "DELETE", &format!("{BASE}/{id}"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let sub = argo.last().unwrap();
    assert_eq!(sub.template, "delete-java-app");
    assert_eq!(sub.options.get("image_url"), Some("NA"));

    let del_task = latest_task_id(&app, &id).await;
    report(&app, &id, &del_task, "DELETE_SUCCESS").await;
    let (_, list) = call(&app, "GET", BASE, None).await;
    assert_eq!(list, json!([]));
    let (_, list) = call(&app, "GET", &format!("{BASE}?show_all=true"), None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["status"], "DELETE_SUCCESS");
}

#[tokio::test]
async fn endpoint_callback_sets_urls() {
    let (state, _, _) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "blue-green").await;
    let (status, _) = call(&app, "PATCH", &format!("{BASE}/{id}/endpoint"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "PATCH", &format!("{BASE}/{id}/endpoint"), Some(json!({"preview_endpoint_url": "web-preview.apps.local"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, got) = call(&app, "GET", &format!("{BASE}/{id}"), None).await;
    assert_eq!(got["preview_endpoint_url"], "web-preview.apps.local");
}

#[tokio::test]
async fn other_organization_cannot_see_app() {
    let (state, _, _) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "canary").await;
    let other = "/api/1.0/organizations/org-2/app-serve-apps";
    let (status, _) = call(&app, "GET", &format!("{other}/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "DELETE", &format!("{other}/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = call(&app, "GET", other, None).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn status_for_unknown_task_is_not_found() {
    let (state, _, _) = memory_state();
    let app = build_router(state);
    let id = create(&app, "web", "canary").await;
    let (status, v) = call(&app, "PATCH", &format!("{BASE}/{id}/status"), Some(json!({"task_id": uuid::Uuid::new_v4(), "status": "DEPLOY_SUCCESS"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(v["code"], "not_found");
}
