//! Task ledger storage. The orchestrator depends only on [`AppServeAppRepository`];
//! Postgres backs the service, the in-memory store backs tests and local runs.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use std::sync::{Mutex, atomic::{AtomicBool, Ordering}};
use uuid::Uuid;
use anyhow::{anyhow, Context};
use crate::models::{AppServeApp, AppServeAppTask, NewAppServeApp, NewTask, PersistentVolume, TaskStatus};

#[async_trait]
pub trait AppServeAppRepository: Send + Sync + 'static {
    /// Inserts the app and its first task together; returns `(app_id, task_id)`.
    async fn create_app(&self, app: &NewAppServeApp, task: &NewTask) -> anyhow::Result<(Uuid, Uuid)>;
    async fn create_task(&self, app_id: Uuid, task: &NewTask) -> anyhow::Result<Uuid>;
    /// Tasks newest first; `status` derived from the head task.
    async fn get_app(&self, app_id: Uuid) -> anyhow::Result<Option<AppServeApp>>;
    /// Without `show_all`, apps whose latest task is `DELETE_SUCCESS` are left out.
    async fn list_apps(&self, organization_id: &str, show_all: bool) -> anyhow::Result<Vec<AppServeApp>>;
    async fn name_exists(&self, organization_id: &str, name: &str) -> anyhow::Result<bool>;
    async fn get_task(&self, app_id: Uuid, task_id: Uuid) -> anyhow::Result<Option<AppServeAppTask>>;
    /// Returns false when no task `task_id` belongs to `app_id`.
    async fn update_task_status(&self, app_id: Uuid, task_id: Uuid, status: &TaskStatus, output: &str) -> anyhow::Result<bool>;
    async fn update_endpoint(&self, app_id: Uuid, endpoint_url: Option<&str>, preview_endpoint_url: Option<&str>) -> anyhow::Result<bool>;
    async fn ping(&self) -> anyhow::Result<()> { Ok(()) }
}

/// Insert refused because the organization already has an app with this name.
#[derive(Debug, thiserror::Error)]
#[error("duplicate app name '{0}'")]
pub struct DuplicateName(pub String);

fn hidden_unless_show_all(app: &AppServeApp, show_all: bool) -> bool {
    !show_all && app.status == TaskStatus::DeleteSuccess
}

#[derive(sqlx::FromRow, Debug, Clone)]
struct AppRow {
    id: Uuid,
    organization_id: String,
    name: String,
    serve_type: String,
    app_type: String,
    target_cluster_id: String,
    endpoint_url: Option<String>,
    preview_endpoint_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AppRow> for AppServeApp {
    type Error = anyhow::Error;
    fn try_from(r: AppRow) -> Result<Self, Self::Error> {
        Ok(AppServeApp {
            id: r.id,
            organization_id: r.organization_id,
            name: r.name,
            serve_type: r.serve_type.parse().map_err(|e: String| anyhow!(e))?,
            app_type: r.app_type.parse().map_err(|e: String| anyhow!(e))?,
            target_cluster_id: r.target_cluster_id,
            endpoint_url: r.endpoint_url,
            preview_endpoint_url: r.preview_endpoint_url,
            status: TaskStatus::Preparing,
            created_at: r.created_at,
            tasks: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
struct TaskRow {
    id: Uuid,
    app_serve_app_id: Uuid,
    version: String,
    strategy: Option<String>,
    artifact_url: String,
    image_url: String,
    executable_path: String,
    profile: String,
    extra_env: String,
    app_config: String,
    app_secret: String,
    resource_spec: String,
    port: String,
    pv_enabled: bool,
    pv_storage_class: String,
    pv_access_mode: String,
    pv_size: String,
    pv_mount_path: String,
    status: String,
    output: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for AppServeAppTask {
    type Error = anyhow::Error;
    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        let strategy = match r.strategy.as_deref() {
            None | Some("") => None,
            Some(s) => Some(s.parse().map_err(|e: String| anyhow!(e))?),
        };
        Ok(AppServeAppTask {
            id: r.id,
            app_serve_app_id: r.app_serve_app_id,
            version: r.version,
            strategy,
            artifact_url: r.artifact_url,
            image_url: r.image_url,
            executable_path: r.executable_path,
            profile: r.profile,
            extra_env: r.extra_env,
            app_config: r.app_config,
            app_secret: r.app_secret,
            resource_spec: r.resource_spec,
            port: r.port,
            pv: PersistentVolume {
                enabled: r.pv_enabled,
                storage_class: r.pv_storage_class,
                access_mode: r.pv_access_mode,
                size: r.pv_size,
                mount_path: r.pv_mount_path,
            },
            status: TaskStatus::from(r.status),
            output: r.output,
            created_at: r.created_at,
        })
    }
}

const APP_COLUMNS: &str = "id, organization_id, name, serve_type, app_type, target_cluster_id, endpoint_url, preview_endpoint_url, created_at";
const TASK_COLUMNS: &str = "id, app_serve_app_id, version, strategy, artifact_url, image_url, executable_path, profile, extra_env, app_config, app_secret, resource_spec, port, pv_enabled, pv_storage_class, pv_access_mode, pv_size, pv_mount_path, status, output, created_at";
const INSERT_TASK: &str = "INSERT INTO app_serve_app_tasks (id, app_serve_app_id, version, strategy, artifact_url, image_url, executable_path, profile, extra_env, app_config, app_secret, resource_spec, port, pv_enabled, pv_storage_class, pv_access_mode, pv_size, pv_mount_path, status) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)";

fn bind_task<'q>(id: Uuid, app_id: Uuid, t: &'q NewTask) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_TASK)
        .bind(id)
        .bind(app_id)
        .bind(&t.version)
        .bind(t.strategy.map(|s| s.as_str()))
        .bind(&t.artifact_url)
        .bind(&t.image_url)
        .bind(&t.executable_path)
        .bind(&t.profile)
        .bind(&t.extra_env)
        .bind(&t.app_config)
        .bind(&t.app_secret)
        .bind(&t.resource_spec)
        .bind(&t.port)
        .bind(t.pv.enabled)
        .bind(&t.pv.storage_class)
        .bind(&t.pv.access_mode)
        .bind(&t.pv.size)
        .bind(&t.pv.mount_path)
        .bind(t.status.as_str().to_string())
}

#[derive(Debug, Clone)]
pub struct PgAppServeAppRepository { pool: Pool<Postgres> }

impl PgAppServeAppRepository {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    async fn tasks_for(&self, app_ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, Vec<AppServeAppTask>>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM app_serve_app_tasks WHERE app_serve_app_id = ANY($1) ORDER BY created_at DESC, seq DESC"))
            .bind(app_ids)
            .fetch_all(&self.pool).await?;
        let mut grouped: HashMap<Uuid, Vec<AppServeAppTask>> = HashMap::new();
        for row in rows {
            let task = AppServeAppTask::try_from(row)?;
            grouped.entry(task.app_serve_app_id).or_default().push(task);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl AppServeAppRepository for PgAppServeAppRepository {
    async fn create_app(&self, app: &NewAppServeApp, task: &NewTask) -> anyhow::Result<(Uuid, Uuid)> {
        let app_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO app_serve_apps (id, organization_id, name, serve_type, app_type, target_cluster_id) VALUES ($1,$2,$3,$4,$5,$6)")
            .bind(app_id)
            .bind(&app.organization_id)
            .bind(&app.name)
            .bind(app.serve_type.as_str())
            .bind(app.app_type.as_str())
            .bind(&app.target_cluster_id)
            .execute(&mut *tx).await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => anyhow::Error::new(DuplicateName(app.name.clone())),
                other => anyhow::Error::new(other).context("insert app_serve_apps"),
            })?;
        bind_task(task_id, app_id, task).execute(&mut *tx).await.context("insert initial task")?;
        tx.commit().await?;
        Ok((app_id, task_id))
    }

    async fn create_task(&self, app_id: Uuid, task: &NewTask) -> anyhow::Result<Uuid> {
        let task_id = Uuid::new_v4();
        bind_task(task_id, app_id, task).execute(&self.pool).await.context("insert task")?;
        Ok(task_id)
    }

    async fn get_app(&self, app_id: Uuid) -> anyhow::Result<Option<AppServeApp>> {
        let Some(row) = sqlx::query_as::<_, AppRow>(&format!("SELECT {APP_COLUMNS} FROM app_serve_apps WHERE id = $1"))
            .bind(app_id)
            .fetch_optional(&self.pool).await? else { return Ok(None) };
        let mut tasks = self.tasks_for(&[app_id]).await?;
        let app = AppServeApp::try_from(row)?.with_tasks(tasks.remove(&app_id).unwrap_or_default());
        Ok(Some(app))
    }

    async fn list_apps(&self, organization_id: &str, show_all: bool) -> anyhow::Result<Vec<AppServeApp>> {
        let rows = sqlx::query_as::<_, AppRow>(&format!("SELECT {APP_COLUMNS} FROM app_serve_apps WHERE organization_id = $1 ORDER BY created_at DESC"))
            .bind(organization_id)
            .fetch_all(&self.pool).await?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut tasks = self.tasks_for(&ids).await?;
        let mut apps = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            let app = AppServeApp::try_from(row)?.with_tasks(tasks.remove(&id).unwrap_or_default());
            if !hidden_unless_show_all(&app, show_all) { apps.push(app); }
        }
        Ok(apps)
    }

    async fn name_exists(&self, organization_id: &str, name: &str) -> anyhow::Result<bool> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM app_serve_apps WHERE organization_id = $1 AND name = $2")
            .bind(organization_id)
            .bind(name)
            .fetch_optional(&self.pool).await?;
        Ok(found.is_some())
    }

    async fn get_task(&self, app_id: Uuid, task_id: Uuid) -> anyhow::Result<Option<AppServeAppTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM app_serve_app_tasks WHERE id = $1 AND app_serve_app_id = $2"))
            .bind(task_id)
            .bind(app_id)
            .fetch_optional(&self.pool).await?;
        row.map(AppServeAppTask::try_from).transpose()
    }

    async fn update_task_status(&self, app_id: Uuid, task_id: Uuid, status: &TaskStatus, output: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE app_serve_app_tasks SET status = $3, output = $4, updated_at = NOW() WHERE id = $1 AND app_serve_app_id = $2")
            .bind(task_id)
            .bind(app_id)
            .bind(status.as_str().to_string())
            .bind(output)
            .execute(&self.pool).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_endpoint(&self, app_id: Uuid, endpoint_url: Option<&str>, preview_endpoint_url: Option<&str>) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE app_serve_apps SET endpoint_url = COALESCE($2, endpoint_url), preview_endpoint_url = COALESCE($3, preview_endpoint_url), updated_at = NOW() WHERE id = $1")
            .bind(app_id)
            .bind(endpoint_url)
            .bind(preview_endpoint_url)
            .execute(&self.pool).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    apps: HashMap<Uuid, AppServeApp>,
    /// Insertion order.
    tasks: Vec<AppServeAppTask>,
}

impl MemoryState {
    fn assemble(&self, app: &AppServeApp) -> AppServeApp {
        let tasks: Vec<AppServeAppTask> = self.tasks.iter().rev().filter(|t| t.app_serve_app_id == app.id).cloned().collect();
        app.clone().with_tasks(tasks)
    }
}

/// Process-local ledger with the same semantics as the Postgres store.
#[derive(Default)]
pub struct InMemoryAppServeAppRepository {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryAppServeAppRepository {
    pub fn new() -> Self { Self::default() }

    /// Make every subsequent insert fail, to exercise persistence errors.
    pub fn set_fail_writes(&self, fail: bool) { self.fail_writes.store(fail, Ordering::SeqCst); }

    /// Make `ping` fail, as a lost database connection would.
    pub fn set_unavailable(&self, down: bool) { self.unavailable.store(down, Ordering::SeqCst); }

    pub fn task_count(&self) -> usize { self.lock().tasks.len() }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) { return Err(anyhow!("in-memory store rejected write")); }
        Ok(())
    }
}

#[async_trait]
impl AppServeAppRepository for InMemoryAppServeAppRepository {
    async fn create_app(&self, app: &NewAppServeApp, task: &NewTask) -> anyhow::Result<(Uuid, Uuid)> {
        self.check_writable()?;
        let mut st = self.lock();
        if st.apps.values().any(|a| a.organization_id == app.organization_id && a.name == app.name) {
            return Err(DuplicateName(app.name.clone()).into());
        }
        let now = Utc::now();
        let app_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        st.apps.insert(app_id, AppServeApp {
            id: app_id,
            organization_id: app.organization_id.clone(),
            name: app.name.clone(),
            serve_type: app.serve_type,
            app_type: app.app_type,
            target_cluster_id: app.target_cluster_id.clone(),
            endpoint_url: None,
            preview_endpoint_url: None,
            status: task.status.clone(),
            created_at: now,
            tasks: Vec::new(),
        });
        st.tasks.push(AppServeAppTask::from_new(task_id, app_id, task, now));
        Ok((app_id, task_id))
    }

    async fn create_task(&self, app_id: Uuid, task: &NewTask) -> anyhow::Result<Uuid> {
        self.check_writable()?;
        let mut st = self.lock();
        if !st.apps.contains_key(&app_id) { return Err(anyhow!("app {app_id} does not exist")); }
        let task_id = Uuid::new_v4();
        st.tasks.push(AppServeAppTask::from_new(task_id, app_id, task, Utc::now()));
        Ok(task_id)
    }

    async fn get_app(&self, app_id: Uuid) -> anyhow::Result<Option<AppServeApp>> {
        let st = self.lock();
        Ok(st.apps.get(&app_id).map(|a| st.assemble(a)))
    }

    async fn list_apps(&self, organization_id: &str, show_all: bool) -> anyhow::Result<Vec<AppServeApp>> {
        let st = self.lock();
        let mut apps: Vec<AppServeApp> = st.apps.values()
            .filter(|a| a.organization_id == organization_id)
            .map(|a| st.assemble(a))
            .filter(|a| !hidden_unless_show_all(a, show_all))
            .collect();
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apps)
    }

    async fn name_exists(&self, organization_id: &str, name: &str) -> anyhow::Result<bool> {
        Ok(self.lock().apps.values().any(|a| a.organization_id == organization_id && a.name == name))
    }

    async fn get_task(&self, app_id: Uuid, task_id: Uuid) -> anyhow::Result<Option<AppServeAppTask>> {
        Ok(self.lock().tasks.iter().find(|t| t.id == task_id && t.app_serve_app_id == app_id).cloned())
    }

    async fn update_task_status(&self, app_id: Uuid, task_id: Uuid, status: &TaskStatus, output: &str) -> anyhow::Result<bool> {
        let mut st = self.lock();
        match st.tasks.iter_mut().find(|t| t.id == task_id && t.app_serve_app_id == app_id) {
            Some(task) => {
                task.status = status.clone();
                task.output = output.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_endpoint(&self, app_id: Uuid, endpoint_url: Option<&str>, preview_endpoint_url: Option<&str>) -> anyhow::Result<bool> {
        let mut st = self.lock();
        let Some(app) = st.apps.get_mut(&app_id) else { return Ok(false) };
        if let Some(url) = endpoint_url { app.endpoint_url = Some(url.to_string()); }
        if let Some(url) = preview_endpoint_url { app.preview_endpoint_url = Some(url.to_string()); }
        Ok(true)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) { return Err(anyhow!("in-memory store marked unavailable")); }
        Ok(())
    }
}
