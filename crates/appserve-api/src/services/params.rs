//! Typed workflow parameters. Nothing becomes a `key=value` string until
//! [`WorkflowParams::to_options`] runs at the dispatcher boundary.
use std::fmt::Display;
use uuid::Uuid;
use crate::config::WorkflowConstants;
use crate::models::{AppType, NewTask, ServeType};
use crate::workflow::SubmitOptions;

const EXECUTABLE_DIR: &str = "/usr/src/myapp/";
const NOT_APPLICABLE: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowTemplate { ServeJavaApp, DeleteJavaApp, PromoteJavaApp, AbortJavaApp }

impl WorkflowTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServeJavaApp => "serve-java-app",
            Self::DeleteJavaApp => "delete-java-app",
            Self::PromoteJavaApp => "promote-java-app",
            Self::AbortJavaApp => "abort-java-app",
        }
    }
}

/// `<registry>/<name>:<version>`.
pub fn derive_image_url(registry: &str, app_name: &str, version: &str) -> String {
    format!("{registry}/{app_name}:{version}")
}

/// Final segment of the artifact URL, placed under the image's app directory.
pub fn derive_executable_path(artifact_url: &str) -> String {
    let file_name = artifact_url.rsplit('/').next().unwrap_or(artifact_url);
    format!("{EXECUTABLE_DIR}{file_name}")
}

/// For anything the workflow builds (`build`/`all`), the image location and
/// springboot entrypoint are fixed by convention and overwrite caller input.
pub fn apply_build_conventions(serve_type: ServeType, app_type: AppType, app_name: &str, registry: &str, task: &mut NewTask) {
    if serve_type == ServeType::Deploy { return; }
    task.image_url = derive_image_url(registry, app_name, &task.version);
    if app_type == AppType::Springboot {
        task.executable_path = derive_executable_path(&task.artifact_url);
    }
}

#[derive(Default)]
struct ParamList(Vec<String>);

impl ParamList {
    fn push(mut self, key: &str, value: impl Display) -> Self {
        self.0.push(format!("{key}={value}"));
        self
    }
}

pub trait WorkflowParams {
    fn template(&self) -> WorkflowTemplate;
    fn to_options(&self) -> SubmitOptions;
}

/// `serve-java-app`: full deployment snapshot plus environment constants.
#[derive(Debug, Clone)]
pub struct ServeParams<'a> {
    pub serve_type: ServeType,
    pub app_type: AppType,
    pub target_cluster_id: &'a str,
    pub app_name: &'a str,
    pub app_id: Uuid,
    pub task_id: Uuid,
    pub task: &'a NewTask,
    pub constants: &'a WorkflowConstants,
}

impl WorkflowParams for ServeParams<'_> {
    fn template(&self) -> WorkflowTemplate { WorkflowTemplate::ServeJavaApp }

    fn to_options(&self) -> SubmitOptions {
        let t = self.task;
        let p = ParamList::default()
            .push("type", self.serve_type.as_str())
            .push("strategy", t.strategy.map(|s| s.as_str()).unwrap_or_default())
            .push("app_type", self.app_type.as_str())
            .push("target_cluster_id", self.target_cluster_id)
            .push("app_name", self.app_name)
            .push("asa_id", self.app_id)
            .push("asa_task_id", self.task_id)
            .push("artifact_url", &t.artifact_url)
            .push("image_url", &t.image_url)
            .push("port", &t.port)
            .push("profile", &t.profile)
            .push("extra_env", &t.extra_env)
            .push("app_config", &t.app_config)
            .push("app_secret", &t.app_secret)
            .push("resource_spec", &t.resource_spec)
            .push("executable_path", &t.executable_path)
            .push("git_repo_url", &self.constants.git_repository_url)
            .push("harbor_pw_secret", &self.constants.harbor_pw_secret)
            .push("pv_enabled", t.pv.enabled)
            .push("pv_storage_class", &t.pv.storage_class)
            .push("pv_access_mode", &t.pv.access_mode)
            .push("pv_size", &t.pv.size)
            .push("pv_mount_path", &t.pv.mount_path);
        SubmitOptions { parameters: p.0 }
    }
}

/// `delete-java-app`: identity only, deployment fields are `NA`.
#[derive(Debug, Clone)]
pub struct DeleteParams<'a> {
    pub serve_type: ServeType,
    pub target_cluster_id: &'a str,
    pub app_name: &'a str,
    pub app_id: Uuid,
    pub task_id: Uuid,
}

impl WorkflowParams for DeleteParams<'_> {
    fn template(&self) -> WorkflowTemplate { WorkflowTemplate::DeleteJavaApp }

    fn to_options(&self) -> SubmitOptions {
        let p = ParamList::default()
            .push("type", self.serve_type.as_str())
            .push("target_cluster_id", self.target_cluster_id)
            .push("app_name", self.app_name)
            .push("asa_id", self.app_id)
            .push("asa_task_id", self.task_id)
            .push("artifact_url", NOT_APPLICABLE)
            .push("image_url", NOT_APPLICABLE)
            .push("port", NOT_APPLICABLE)
            .push("profile", NOT_APPLICABLE)
            .push("resource_spec", NOT_APPLICABLE)
            .push("executable_path", NOT_APPLICABLE);
        SubmitOptions { parameters: p.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueGreenDecision { Promote, Abort }

/// `promote-java-app` / `abort-java-app`, addressed at the task awaiting the decision.
#[derive(Debug, Clone)]
pub struct BlueGreenParams<'a> {
    pub decision: BlueGreenDecision,
    pub target_cluster_id: &'a str,
    pub app_name: &'a str,
    pub app_id: Uuid,
    pub task_id: Uuid,
}

impl WorkflowParams for BlueGreenParams<'_> {
    fn template(&self) -> WorkflowTemplate {
        match self.decision {
            BlueGreenDecision::Promote => WorkflowTemplate::PromoteJavaApp,
            BlueGreenDecision::Abort => WorkflowTemplate::AbortJavaApp,
        }
    }

    fn to_options(&self) -> SubmitOptions {
        let p = ParamList::default()
            .push("target_cluster_id", self.target_cluster_id)
            .push("app_name", self.app_name)
            .push("asa_id", self.app_id)
            .push("asa_task_id", self.task_id);
        SubmitOptions { parameters: p.0 }
    }
}
