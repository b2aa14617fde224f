//! AppServeApp lifecycle orchestration.
//!
//! Every mutating operation follows the same shape: load the aggregate,
//! check the persisted latest-task status, append a task to the ledger,
//! then submit the workflow. Completion is asynchronous; the workflow engine
//! reports back through [`AppServeAppService::update_status`].
//!
//! If the workflow submission fails after the task row was written, the row
//! stays in its in-flight status and the error names the orphaned task.
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use crate::config::WorkflowConstants;
use crate::error::AppServeError;
use crate::models::{AppServeApp, AppServeAppTask, AppType, NewAppServeApp, NewTask, ServeType, Strategy, TaskSpec, TaskStatus};
use crate::repository::{AppServeAppRepository, DuplicateName};
use crate::telemetry::{record_lifecycle, WORKFLOW_SUBMISSIONS};
use crate::workflow::WorkflowDispatcher;
use super::locks::AppLocks;
use super::params::{apply_build_conventions, BlueGreenDecision, BlueGreenParams, DeleteParams, ServeParams, WorkflowParams};

type Result<T> = std::result::Result<T, AppServeError>;

const STRATEGY_ERROR: &str = "'strategy' should be one of these values: rolling-update, blue-green, canary";
const DEPLOY_PARAMS_ERROR: &str = "for 'deploy' type springboot apps the following params must be provided: image_url, executable_path, profile, resource_spec";

pub struct AppServeAppService {
    repo: Arc<dyn AppServeAppRepository>,
    dispatcher: Arc<dyn WorkflowDispatcher>,
    constants: WorkflowConstants,
    locks: AppLocks,
}

fn parse_strategy(raw: &str) -> Result<Strategy> {
    raw.parse().map_err(|_| AppServeError::validation(STRATEGY_ERROR))
}

fn persistence(e: anyhow::Error) -> AppServeError { AppServeError::Persistence(e) }

fn name_conflict(name: &str) -> AppServeError {
    AppServeError::Conflict(format!("app name '{name}' already exists in the organization"))
}

impl AppServeAppService {
    pub fn new(repo: Arc<dyn AppServeAppRepository>, dispatcher: Arc<dyn WorkflowDispatcher>, constants: WorkflowConstants) -> Self {
        Self { repo, dispatcher, constants, locks: AppLocks::new() }
    }

    /// Registers a new application with its first task and starts `serve-java-app`.
    /// Returns the new app id and name.
    #[tracing::instrument(level = "info", name = "app_serve.create", skip(self, req), fields(org = %req.organization_id, app_name = %req.name))]
    pub async fn create(&self, req: NewAppServeApp) -> Result<(Uuid, String)> {
        let res: Result<(Uuid, String)> = async {
            if req.name.trim().is_empty() { return Err(AppServeError::validation("'name' is mandatory")); }
            let strategy = if req.task.strategy.is_empty() { Strategy::RollingUpdate } else { parse_strategy(&req.task.strategy)? };
            let spec = &req.task;
            if req.serve_type != ServeType::Deploy {
                if spec.artifact_url.is_empty() {
                    return Err(AppServeError::validation("for 'build'/'all' type apps 'artifact_url' is mandatory"));
                }
            } else if req.app_type == AppType::Springboot
                && [&spec.image_url, &spec.executable_path, &spec.profile, &spec.resource_spec].iter().any(|v| v.is_empty())
            {
                return Err(AppServeError::validation(DEPLOY_PARAMS_ERROR));
            }
            let mut task = NewTask::from_spec(spec, strategy);
            apply_build_conventions(req.serve_type, req.app_type, &req.name, &self.constants.image_registry_url, &mut task);

            if self.repo.name_exists(&req.organization_id, &req.name).await.map_err(persistence)? {
                return Err(name_conflict(&req.name));
            }
            // The name can be taken between the check and the insert.
            let (app_id, task_id) = self.repo.create_app(&req, &task).await.map_err(|e| {
                if e.downcast_ref::<DuplicateName>().is_some() { name_conflict(&req.name) } else { persistence(e) }
            })?;
            info!(%app_id, %task_id, "app-serve app created");
            let params = ServeParams {
                serve_type: req.serve_type,
                app_type: req.app_type,
                target_cluster_id: &req.target_cluster_id,
                app_name: &req.name,
                app_id,
                task_id,
                task: &task,
                constants: &self.constants,
            };
            self.dispatch(&params, Some(task_id)).await?;
            Ok((app_id, req.name.clone()))
        }.await;
        record_lifecycle("create", &res);
        res
    }

    pub async fn list(&self, organization_id: &str, show_all: bool) -> Result<Vec<AppServeApp>> {
        self.repo.list_apps(organization_id, show_all).await.map_err(persistence)
    }

    pub async fn get(&self, organization_id: &str, app_id: Uuid) -> Result<AppServeApp> {
        self.load(organization_id, app_id).await
    }

    pub async fn name_exists(&self, organization_id: &str, name: &str) -> Result<bool> {
        self.repo.name_exists(organization_id, name).await.map_err(persistence)
    }

    pub async fn tasks(&self, organization_id: &str, app_id: Uuid) -> Result<Vec<AppServeAppTask>> {
        Ok(self.load(organization_id, app_id).await?.tasks)
    }

    pub async fn latest_task(&self, organization_id: &str, app_id: Uuid) -> Result<AppServeAppTask> {
        let app = self.load(organization_id, app_id).await?;
        app.tasks.into_iter().next().ok_or_else(|| AppServeError::not_found(format!("app-serve app {app_id} has no tasks")))
    }

    pub async fn task(&self, organization_id: &str, app_id: Uuid, task_id: Uuid) -> Result<AppServeAppTask> {
        self.load(organization_id, app_id).await?;
        self.repo.get_task(app_id, task_id).await.map_err(persistence)?
            .ok_or_else(|| AppServeError::not_found(format!("task {task_id} not found for app-serve app {app_id}")))
    }

    /// Appends a new version of an existing app and starts `serve-java-app`.
    /// Immutable app attributes are never touched.
    #[tracing::instrument(level = "info", name = "app_serve.update", skip(self, spec), fields(strategy = %spec.strategy))]
    pub async fn update(&self, organization_id: &str, app_id: Uuid, spec: TaskSpec) -> Result<String> {
        let res: Result<String> = async {
            let strategy = parse_strategy(&spec.strategy)?;
            let _guard = self.locks.acquire(app_id).await;
            let app = self.load(organization_id, app_id).await?;
            let mut task = NewTask::from_spec(&spec, strategy);
            apply_build_conventions(app.serve_type, app.app_type, &app.name, &self.constants.image_registry_url, &mut task);
            let task_id = self.repo.create_task(app.id, &task).await.map_err(persistence)?;
            info!(%task_id, "update task recorded");
            self.serve(&app, task_id, &task).await?;
            Ok(format!("The app '{}' is being updated. Confirm result by checking the app status after a while.", app.name))
        }.await;
        record_lifecycle("update", &res);
        res
    }

    /// Records a `DELETING` task and starts `delete-java-app`. Refused while a
    /// blue/green rollout waits for promote or abort.
    #[tracing::instrument(level = "info", name = "app_serve.delete", skip(self))]
    pub async fn delete(&self, organization_id: &str, app_id: Uuid) -> Result<String> {
        let res: Result<String> = async {
            let _guard = self.locks.acquire(app_id).await;
            let app = self.load(organization_id, app_id).await?;
            if app.status.is_bluegreen_pending() {
                return Err(AppServeError::precondition("the app is in blue-green related state; promote or abort first before deleting"));
            }
            let task_id = self.repo.create_task(app.id, &NewTask::deleting()).await.map_err(persistence)?;
            info!(%task_id, "delete task recorded");
            let params = DeleteParams {
                serve_type: app.serve_type,
                target_cluster_id: &app.target_cluster_id,
                app_name: &app.name,
                app_id: app.id,
                task_id,
            };
            self.dispatch(&params, Some(task_id)).await?;
            Ok(format!("The app '{}' is being deleted. Confirm result by checking the app status after a while.", app.name))
        }.await;
        record_lifecycle("delete", &res);
        res
    }

    /// Switches traffic to the staged blue/green version. No task is added;
    /// the workflow reports against the task awaiting promotion.
    #[tracing::instrument(level = "info", name = "app_serve.promote", skip(self))]
    pub async fn promote(&self, organization_id: &str, app_id: Uuid) -> Result<String> {
        let res: Result<String> = async {
            let _guard = self.locks.acquire(app_id).await;
            let app = self.load(organization_id, app_id).await?;
            if app.status != TaskStatus::WaitForPromote {
                return Err(AppServeError::precondition(format!("the app is not in 'WAIT_FOR_PROMOTE' state (current: {})", app.status)));
            }
            self.decide(&app, BlueGreenDecision::Promote).await?;
            Ok(format!("The app '{}' is being promoted. Confirm result by checking the app status after a while.", app.name))
        }.await;
        record_lifecycle("promote", &res);
        res
    }

    /// Discards the staged blue/green version, also after a failed rollout.
    #[tracing::instrument(level = "info", name = "app_serve.abort", skip(self))]
    pub async fn abort(&self, organization_id: &str, app_id: Uuid) -> Result<String> {
        let res: Result<String> = async {
            let _guard = self.locks.acquire(app_id).await;
            let app = self.load(organization_id, app_id).await?;
            if !app.status.is_bluegreen_pending() {
                return Err(AppServeError::precondition(format!("the app is not in blue-green related state (current: {})", app.status)));
            }
            self.decide(&app, BlueGreenDecision::Abort).await?;
            Ok(format!("The app '{}' is being aborted. Confirm result by checking the app status after a while.", app.name))
        }.await;
        record_lifecycle("abort", &res);
        res
    }

    /// Re-deploys the snapshot recorded in an earlier task as a new task.
    #[tracing::instrument(level = "info", name = "app_serve.rollback", skip(self))]
    pub async fn rollback(&self, organization_id: &str, app_id: Uuid, target_task_id: Uuid) -> Result<String> {
        let res: Result<String> = async {
            let _guard = self.locks.acquire(app_id).await;
            let app = self.load(organization_id, app_id).await?;
            if app.status.is_bluegreen_pending() {
                return Err(AppServeError::precondition("the app is in blue-green related state; promote or abort first before rolling back"));
            }
            if matches!(app.status, TaskStatus::Deleting | TaskStatus::DeleteSuccess) {
                return Err(AppServeError::precondition("the app is being or has been deleted"));
            }
            let target = self.repo.get_task(app.id, target_task_id).await.map_err(persistence)?
                .ok_or_else(|| AppServeError::not_found(format!("task {target_task_id} not found for app-serve app {app_id}")))?;
            if target.strategy.is_none() {
                return Err(AppServeError::validation("the target task carries no deployment snapshot"));
            }
            let task = NewTask::replay(&target);
            let task_id = self.repo.create_task(app.id, &task).await.map_err(persistence)?;
            info!(%task_id, version=%task.version, "rollback task recorded");
            self.serve(&app, task_id, &task).await?;
            Ok(format!("The app '{}' is being rolled back to version '{}'. Confirm result by checking the app status after a while.", app.name, task.version))
        }.await;
        record_lifecycle("rollback", &res);
        res
    }

    /// Workflow engine write path: the only place a task changes after insert.
    #[tracing::instrument(level = "info", name = "app_serve.status", skip(self, output))]
    pub async fn update_status(&self, organization_id: &str, app_id: Uuid, task_id: Uuid, status: TaskStatus, output: &str) -> Result<()> {
        self.load(organization_id, app_id).await?;
        let updated = self.repo.update_task_status(app_id, task_id, &status, output).await.map_err(persistence)?;
        if !updated {
            return Err(AppServeError::not_found(format!("task {task_id} not found for app-serve app {app_id}")));
        }
        Ok(())
    }

    pub async fn update_endpoint(&self, organization_id: &str, app_id: Uuid, endpoint_url: Option<&str>, preview_endpoint_url: Option<&str>) -> Result<()> {
        self.load(organization_id, app_id).await?;
        if endpoint_url.is_none() && preview_endpoint_url.is_none() {
            return Err(AppServeError::validation("either 'endpoint_url' or 'preview_endpoint_url' must be provided"));
        }
        self.repo.update_endpoint(app_id, endpoint_url, preview_endpoint_url).await.map_err(persistence)?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> { self.repo.ping().await }

    async fn load(&self, organization_id: &str, app_id: Uuid) -> Result<AppServeApp> {
        match self.repo.get_app(app_id).await.map_err(persistence)? {
            Some(app) if app.organization_id == organization_id => Ok(app),
            _ => Err(AppServeError::not_found(format!("app-serve app {app_id} not found"))),
        }
    }

    async fn serve(&self, app: &AppServeApp, task_id: Uuid, task: &NewTask) -> Result<String> {
        let params = ServeParams {
            serve_type: app.serve_type,
            app_type: app.app_type,
            target_cluster_id: &app.target_cluster_id,
            app_name: &app.name,
            app_id: app.id,
            task_id,
            task,
            constants: &self.constants,
        };
        self.dispatch(&params, Some(task_id)).await
    }

    async fn decide(&self, app: &AppServeApp, decision: BlueGreenDecision) -> Result<String> {
        let latest = app.latest_task()
            .ok_or_else(|| AppServeError::precondition("the app has no task awaiting a blue-green decision"))?;
        info!(latest_task_id=%latest.id, ?decision, "blue-green decision");
        let params = BlueGreenParams {
            decision,
            target_cluster_id: &app.target_cluster_id,
            app_name: &app.name,
            app_id: app.id,
            task_id: latest.id,
        };
        self.dispatch(&params, None).await
    }

    /// `orphan` is the task written just before this submission, if any.
    async fn dispatch(&self, params: &impl WorkflowParams, orphan: Option<Uuid>) -> Result<String> {
        let workflow = params.template().as_str();
        info!(workflow, "submitting workflow");
        match self.dispatcher.submit_workflow(workflow, params.to_options()).await {
            Ok(workflow_id) => {
                WORKFLOW_SUBMISSIONS.with_label_values(&[workflow, "success"]).inc();
                info!(workflow, %workflow_id, "workflow submitted");
                Ok(workflow_id)
            }
            Err(source) => {
                WORKFLOW_SUBMISSIONS.with_label_values(&[workflow, "error"]).inc();
                warn!(workflow, orphaned_task_id=?orphan, error=%source, "workflow submission failed; task left in flight");
                Err(AppServeError::Dispatch { workflow, task_id: orphan, source })
            }
        }
    }
}
