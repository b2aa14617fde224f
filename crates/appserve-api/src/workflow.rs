use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{anyhow, Context};
use tracing::{debug, info};

/// Flat `key=value` parameters, the only shape the workflow engine accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions { pub parameters: Vec<String> }

impl SubmitOptions {
    /// Value of the first `key=...` entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters.iter().find_map(|p| p.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
    }
}

/// Submits a named workflow template and returns the run id. Fire-and-forget:
/// completion is reported back through the status callback.
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync + 'static {
    async fn submit_workflow(&self, template: &str, opts: SubmitOptions) -> anyhow::Result<String>;
}

/// Argo Workflows server REST client (`POST /api/v1/workflows/{ns}/submit`).
#[derive(Debug, Clone)]
pub struct ArgoWorkflowClient { client: reqwest::Client, base_url: String, namespace: String }

#[derive(Deserialize)]
struct SubmittedWorkflow { metadata: WorkflowMetadata }

#[derive(Deserialize)]
struct WorkflowMetadata { name: String }

impl ArgoWorkflowClient {
    pub fn new(base_url: impl Into<String>, namespace: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base_url: base_url.into(), namespace: namespace.into() })
    }
}

#[async_trait]
impl WorkflowDispatcher for ArgoWorkflowClient {
    async fn submit_workflow(&self, template: &str, opts: SubmitOptions) -> anyhow::Result<String> {
        let url = format!("{}/api/v1/workflows/{}/submit", self.base_url.trim_end_matches('/'), self.namespace);
        let body = json!({
            "namespace": self.namespace,
            "resourceKind": "WorkflowTemplate",
            "resourceName": template,
            "submitOptions": { "parameters": opts.parameters },
        });
        debug!(%url, template, "argo.submit");
        let resp = self.client.post(&url).json(&body).send().await.with_context(|| format!("POST {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("argo server returned {status}: {text}"));
        }
        let wf: SubmittedWorkflow = resp.json().await.context("decode argo submit response")?;
        info!(template, workflow_id=%wf.metadata.name, "argo.submitted");
        Ok(wf.metadata.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubmission { pub template: String, pub options: SubmitOptions }

/// Records submissions instead of running them.
#[derive(Debug, Default)]
pub struct MockWorkflowDispatcher {
    submissions: Mutex<Vec<RecordedSubmission>>,
    fail: Mutex<Option<String>>,
}

impl MockWorkflowDispatcher {
    pub fn new() -> Self { Self::default() }

    /// Reject every following submission with `reason`; `None` restores success.
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = reason.map(str::to_string);
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn last(&self) -> Option<RecordedSubmission> { self.submissions().pop() }
}

#[async_trait]
impl WorkflowDispatcher for MockWorkflowDispatcher {
    async fn submit_workflow(&self, template: &str, opts: SubmitOptions) -> anyhow::Result<String> {
        if let Some(reason) = self.fail.lock().unwrap_or_else(|p| p.into_inner()).clone() {
            return Err(anyhow!(reason));
        }
        let mut subs = self.submissions.lock().unwrap_or_else(|p| p.into_inner());
        subs.push(RecordedSubmission { template: template.to_string(), options: opts });
        Ok(format!("{template}-{}", subs.len()))
    }
}
