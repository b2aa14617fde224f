use serde::{Serialize, Deserialize};
use utoipa::ToSchema;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr};

/// What the workflow does with the application: build an image, deploy an
/// existing image, or both.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServeType { Build, Deploy, All }

impl ServeType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Build => "build", Self::Deploy => "deploy", Self::All => "all" }
    }
}

impl FromStr for ServeType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "deploy" => Ok(Self::Deploy),
            "all" => Ok(Self::All),
            other => Err(format!("unknown serve type '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppType { Springboot, Generic }

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Springboot => "springboot", Self::Generic => "generic" }
    }
}

impl FromStr for AppType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "springboot" => Ok(Self::Springboot),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown app type '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy { RollingUpdate, BlueGreen, Canary }

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self { Self::RollingUpdate => "rolling-update", Self::BlueGreen => "blue-green", Self::Canary => "canary" }
    }
}

impl FromStr for Strategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling-update" => Ok(Self::RollingUpdate),
            "blue-green" => Ok(Self::BlueGreen),
            "canary" => Ok(Self::Canary),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Task status. The orchestrator only writes `PREPARING` and `DELETING`;
/// every other value arrives from the workflow engine through the status
/// callback, so unknown strings are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Preparing,
    Deleting,
    WaitForPromote,
    BluegreenFailed,
    DeleteSuccess,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Preparing => "PREPARING",
            Self::Deleting => "DELETING",
            Self::WaitForPromote => "WAIT_FOR_PROMOTE",
            Self::BluegreenFailed => "BLUEGREEN_FAILED",
            Self::DeleteSuccess => "DELETE_SUCCESS",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Blue/green deployment staged and waiting for an explicit promote or abort.
    pub fn is_bluegreen_pending(&self) -> bool {
        matches!(self, Self::WaitForPromote | Self::BluegreenFailed)
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PREPARING" => Self::Preparing,
            "DELETING" => Self::Deleting,
            "WAIT_FOR_PROMOTE" => Self::WaitForPromote,
            "BLUEGREEN_FAILED" => Self::BluegreenFailed,
            "DELETE_SUCCESS" => Self::DeleteSuccess,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self { Self::from(s.to_string()) }
}

impl From<TaskStatus> for String {
    fn from(s: TaskStatus) -> Self { s.as_str().to_string() }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, ToSchema)]
pub struct PersistentVolume {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub storage_class: String,
    #[serde(default)]
    pub access_mode: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub mount_path: String,
}

/// Caller-supplied deployment parameters for one lifecycle request.
/// `strategy` stays a raw string here; the orchestrator validates it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct TaskSpec {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub artifact_url: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub executable_path: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub extra_env: String,
    #[serde(default)]
    pub app_config: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub resource_spec: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub pv: PersistentVolume,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct NewAppServeApp {
    pub organization_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub serve_type: ServeType,
    pub app_type: AppType,
    pub target_cluster_id: String,
    pub task: TaskSpec,
}

/// A validated task about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub version: String,
    pub strategy: Option<Strategy>,
    pub artifact_url: String,
    pub image_url: String,
    pub executable_path: String,
    pub profile: String,
    pub extra_env: String,
    pub app_config: String,
    pub app_secret: String,
    pub resource_spec: String,
    pub port: String,
    pub pv: PersistentVolume,
    pub status: TaskStatus,
}

impl NewTask {
    pub fn from_spec(spec: &TaskSpec, strategy: Strategy) -> Self {
        Self {
            version: spec.version.clone(),
            strategy: Some(strategy),
            artifact_url: spec.artifact_url.clone(),
            image_url: spec.image_url.clone(),
            executable_path: spec.executable_path.clone(),
            profile: spec.profile.clone(),
            extra_env: spec.extra_env.clone(),
            app_config: spec.app_config.clone(),
            app_secret: spec.app_secret.clone(),
            resource_spec: spec.resource_spec.clone(),
            port: spec.port.clone(),
            pv: spec.pv.clone(),
            status: TaskStatus::Preparing,
        }
    }

    /// Teardown task: no deployment parameters, status `DELETING`.
    pub fn deleting() -> Self {
        Self {
            version: String::new(),
            strategy: None,
            artifact_url: String::new(),
            image_url: String::new(),
            executable_path: String::new(),
            profile: String::new(),
            extra_env: String::new(),
            app_config: String::new(),
            app_secret: String::new(),
            resource_spec: String::new(),
            port: String::new(),
            pv: PersistentVolume::default(),
            status: TaskStatus::Deleting,
        }
    }

    /// Fresh in-flight copy of a recorded snapshot.
    pub fn replay(task: &AppServeAppTask) -> Self {
        Self {
            version: task.version.clone(),
            strategy: task.strategy,
            artifact_url: task.artifact_url.clone(),
            image_url: task.image_url.clone(),
            executable_path: task.executable_path.clone(),
            profile: task.profile.clone(),
            extra_env: task.extra_env.clone(),
            app_config: task.app_config.clone(),
            app_secret: task.app_secret.clone(),
            resource_spec: task.resource_spec.clone(),
            port: task.port.clone(),
            pv: task.pv.clone(),
            status: TaskStatus::Preparing,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AppServeAppTask {
    pub id: Uuid,
    pub app_serve_app_id: Uuid,
    pub version: String,
    pub strategy: Option<Strategy>,
    pub artifact_url: String,
    pub image_url: String,
    pub executable_path: String,
    pub profile: String,
    pub extra_env: String,
    pub app_config: String,
    pub app_secret: String,
    pub resource_spec: String,
    pub port: String,
    pub pv: PersistentVolume,
    #[schema(value_type = String)]
    pub status: TaskStatus,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

impl AppServeAppTask {
    pub fn from_new(id: Uuid, app_serve_app_id: Uuid, task: &NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            app_serve_app_id,
            version: task.version.clone(),
            strategy: task.strategy,
            artifact_url: task.artifact_url.clone(),
            image_url: task.image_url.clone(),
            executable_path: task.executable_path.clone(),
            profile: task.profile.clone(),
            extra_env: task.extra_env.clone(),
            app_config: task.app_config.clone(),
            app_secret: task.app_secret.clone(),
            resource_spec: task.resource_spec.clone(),
            port: task.port.clone(),
            pv: task.pv.clone(),
            status: task.status.clone(),
            output: String::new(),
            created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AppServeApp {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub serve_type: ServeType,
    pub app_type: AppType,
    pub target_cluster_id: String,
    pub endpoint_url: Option<String>,
    pub preview_endpoint_url: Option<String>,
    /// Mirrors the latest task; derived on read, never stored.
    #[schema(value_type = String)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Newest first.
    pub tasks: Vec<AppServeAppTask>,
}

impl AppServeApp {
    pub fn latest_task(&self) -> Option<&AppServeAppTask> { self.tasks.first() }

    /// Orders `tasks` newest first and refreshes `status` from the head.
    /// Equal timestamps keep their incoming order, so callers pass tasks in
    /// insertion order reversed.
    pub fn with_tasks(mut self, mut tasks: Vec<AppServeAppTask>) -> Self {
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.status = tasks.first().map(|t| t.status.clone()).unwrap_or(TaskStatus::Preparing);
        self.tasks = tasks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_unknown_values() {
        let s: TaskStatus = "DEPLOY_SUCCESS".into();
        assert_eq!(s, TaskStatus::Other("DEPLOY_SUCCESS".into()));
        assert_eq!(serde_json::to_value(&s).unwrap(), serde_json::json!("DEPLOY_SUCCESS"));
        let w: TaskStatus = serde_json::from_str("\"WAIT_FOR_PROMOTE\"").unwrap();
        assert!(w.is_bluegreen_pending());
    }

    #[test]
    fn strategy_parses_only_known_values() {
        assert_eq!("blue-green".parse::<Strategy>(), Ok(Strategy::BlueGreen));
        assert!("recreate".parse::<Strategy>().is_err());
        assert!("Blue-Green".parse::<Strategy>().is_err());
    }

    #[test]
    fn latest_task_mirrors_status() {
        let app_id = Uuid::new_v4();
        let t0 = Utc::now();
        let old = AppServeAppTask::from_new(Uuid::new_v4(), app_id, &NewTask::deleting(), t0);
        let mut newer = old.clone();
        newer.id = Uuid::new_v4();
        newer.status = TaskStatus::WaitForPromote;
        newer.created_at = t0 + chrono::Duration::seconds(5);
        let app = AppServeApp {
            id: app_id, organization_id: "org".into(), name: "a".into(), serve_type: ServeType::All,
            app_type: AppType::Generic, target_cluster_id: "c".into(), endpoint_url: None,
            preview_endpoint_url: None, status: TaskStatus::Preparing, created_at: t0, tasks: vec![],
        }.with_tasks(vec![old, newer.clone()]);
        assert_eq!(app.latest_task().map(|t| t.id), Some(newer.id));
        assert_eq!(app.status, TaskStatus::WaitForPromote);
    }
}
