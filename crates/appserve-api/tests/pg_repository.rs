use appserve_api::models::{AppType, NewAppServeApp, NewTask, ServeType, Strategy, TaskSpec, TaskStatus};
use appserve_api::repository::{AppServeAppRepository, DuplicateName, PgAppServeAppRepository};
use appserve_api::test_support::{pg_state, reset_tables, test_pool};
use appserve_api::build_router;
use axum::{body::Body, http::{Request, StatusCode}};
use serial_test::serial;
use tower::util::ServiceExt;

fn new_app(org: &str, name: &str) -> NewAppServeApp {
    NewAppServeApp {
        organization_id: org.into(),
        name: name.into(),
        serve_type: ServeType::Build,
        app_type: AppType::Springboot,
        target_cluster_id: "c-1".into(),
        task: TaskSpec::default(),
    }
}

fn task(version: &str) -> NewTask {
    let mut t = NewTask::from_spec(&TaskSpec { version: version.into(), artifact_url: "s3://b/web.jar".into(), ..Default::default() }, Strategy::BlueGreen);
    t.pv.enabled = true;
    t.pv.size = "1Gi".into();
    t
}

#[tokio::test]
#[serial]
async fn schema_tables_exist() {
    let Some(pool) = test_pool().await else { eprintln!("skipping schema_tables_exist (no db)"); return; };
    for table in ["app_serve_apps", "app_serve_app_tasks"] {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM information_schema.tables WHERE table_schema='public' AND table_name=$1")
            .bind(table).fetch_optional(&pool).await.unwrap();
        assert!(exists.is_some(), "table '{table}' missing after migrations");
    }
}

#[tokio::test]
#[serial]
async fn ledger_round_trip_and_ordering() {
    let Some(pool) = test_pool().await else { eprintln!("skipping ledger_round_trip_and_ordering (no db)"); return; };
    reset_tables(&pool).await;
    let repo = PgAppServeAppRepository::new(pool);
    let (app_id, t1) = repo.create_app(&new_app("org", "web"), &task("1.0")).await.unwrap();
    let t2 = repo.create_task(app_id, &task("2.0")).await.unwrap();

    let app = repo.get_app(app_id).await.unwrap().unwrap();
    assert_eq!(app.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t2, t1]);
    assert_eq!(app.status, TaskStatus::Preparing);
    let first = repo.get_task(app_id, t1).await.unwrap().unwrap();
    assert_eq!(first.version, "1.0");
    assert_eq!(first.strategy, Some(Strategy::BlueGreen));
    assert!(first.pv.enabled);
    assert_eq!(first.pv.size, "1Gi");

    assert!(repo.update_task_status(app_id, t2, &TaskStatus::WaitForPromote, "staged").await.unwrap());
    assert!(!repo.update_task_status(app_id, uuid::Uuid::new_v4(), &TaskStatus::WaitForPromote, "").await.unwrap());
    let app = repo.get_app(app_id).await.unwrap().unwrap();
    assert_eq!(app.status, TaskStatus::WaitForPromote);
    assert_eq!(app.tasks[0].output, "staged");
}

#[tokio::test]
#[serial]
async fn names_are_unique_per_organization() {
    let Some(pool) = test_pool().await else { eprintln!("skipping names_are_unique_per_organization (no db)"); return; };
    reset_tables(&pool).await;
    let repo = PgAppServeAppRepository::new(pool);
    repo.create_app(&new_app("org", "web"), &task("1")).await.unwrap();
    let err = repo.create_app(&new_app("org", "web"), &task("1")).await.unwrap_err();
    assert!(err.downcast_ref::<DuplicateName>().is_some(), "{err:?}");
    repo.create_app(&new_app("other", "web"), &task("1")).await.unwrap();
    assert!(repo.name_exists("org", "web").await.unwrap());
    assert!(!repo.name_exists("org", "api").await.unwrap());
}

#[tokio::test]
#[serial]
async fn list_hides_deleted_and_endpoint_keeps_unset_fields() {
    let Some(pool) = test_pool().await else { eprintln!("skipping list_hides_deleted (no db)"); return; };
    reset_tables(&pool).await;
    let repo = PgAppServeAppRepository::new(pool);
    let (gone, _) = repo.create_app(&new_app("org", "gone"), &task("1")).await.unwrap();
    let (live, _) = repo.create_app(&new_app("org", "live"), &task("1")).await.unwrap();
    let del = repo.create_task(gone, &NewTask::deleting()).await.unwrap();
    repo.update_task_status(gone, del, &TaskStatus::DeleteSuccess, "").await.unwrap();
    let names: Vec<String> = repo.list_apps("org", false).await.unwrap().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["live".to_string()]);
    assert_eq!(repo.list_apps("org", true).await.unwrap().len(), 2);

    assert!(repo.update_endpoint(live, Some("web.apps.local"), None).await.unwrap());
    assert!(repo.update_endpoint(live, None, Some("web-preview.apps.local")).await.unwrap());
    let app = repo.get_app(live).await.unwrap().unwrap();
    assert_eq!(app.endpoint_url.as_deref(), Some("web.apps.local"));
    assert_eq!(app.preview_endpoint_url.as_deref(), Some("web-preview.apps.local"));
}

#[tokio::test]
#[serial]
async fn router_over_postgres_creates_and_reports_ready() {
    let Some((state, _pool, argo)) = pg_state().await else { eprintln!("skipping router_over_postgres (no db)"); return; };
    let app = build_router(state);
    let res = app.clone().oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = serde_json::json!({
        "name": "web", "type": "build", "app_type": "generic", "target_cluster_id": "c-1",
        "version": "1", "strategy": "canary", "artifact_url": "s3://b/web.tar"
    });
    let req = Request::builder().method("POST").uri("/api/1.0/organizations/org-1/app-serve-apps")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string())).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(argo.submissions().len(), 1);
}
