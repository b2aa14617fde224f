//! Test harness utilities for unit and integration tests; not used by the
//! service binary. In-memory state needs nothing external; the Postgres
//! helpers return `None` when `DATABASE_URL` is unset or unreachable so
//! callers can skip.
use std::sync::Arc;
use sqlx::{Pool, Postgres};
use crate::AppState;
use crate::config::WorkflowConstants;
use crate::repository::{AppServeAppRepository, InMemoryAppServeAppRepository, PgAppServeAppRepository};
use crate::services::AppServeAppService;
use crate::workflow::MockWorkflowDispatcher;

static TEST_DB_URL_ENV: &str = "DATABASE_URL";

pub fn test_constants() -> WorkflowConstants {
    WorkflowConstants {
        image_registry_url: "harbor.local/apps".into(),
        git_repository_url: "github.com/acme/decapod-apps".into(),
        harbor_pw_secret: "harbor-core".into(),
    }
}

fn state_over(repo: Arc<dyn AppServeAppRepository>, argo: Arc<MockWorkflowDispatcher>) -> AppState {
    AppState { apps: Arc::new(AppServeAppService::new(repo, argo, test_constants())) }
}

/// Router state over the in-memory ledger and a recording dispatcher.
pub fn memory_state() -> (AppState, Arc<InMemoryAppServeAppRepository>, Arc<MockWorkflowDispatcher>) {
    let repo = Arc::new(InMemoryAppServeAppRepository::new());
    let argo = Arc::new(MockWorkflowDispatcher::new());
    (state_over(repo.clone(), argo.clone()), repo, argo)
}

/// Migrated pool, or `None` when no database is configured or reachable.
/// Set `APPSERVE_TEST_SHARED_POOL=1` to reuse one pool across tests.
pub async fn test_pool() -> Option<Pool<Postgres>> {
    let url = std::env::var(TEST_DB_URL_ENV).ok().filter(|u| !u.is_empty())?;
    let shared = std::env::var("APPSERVE_TEST_SHARED_POOL").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if shared {
        use tokio::sync::OnceCell;
        static POOL: OnceCell<Option<Pool<Postgres>>> = OnceCell::const_new();
        return POOL.get_or_init(|| build_test_pool(url)).await.clone();
    }
    build_test_pool(url).await
}

async fn build_test_pool(url: String) -> Option<Pool<Postgres>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(8))
        .connect(&url).await;
    let pool = match pool {
        Ok(p) => p,
        Err(e) => { eprintln!("[test_pool] connect failed, skipping: {e}"); return None; }
    };
    if let Err(e) = sqlx::migrate!().run(&pool).await {
        eprintln!("[test_pool] migrations failed, skipping: {e}");
        return None;
    }
    Some(pool)
}

/// Empty both ledger tables.
pub async fn reset_tables(pool: &Pool<Postgres>) {
    let _ = sqlx::query("DELETE FROM app_serve_app_tasks").execute(pool).await;
    let _ = sqlx::query("DELETE FROM app_serve_apps").execute(pool).await;
}

/// Fresh Postgres-backed state, or `None` when no database is configured.
pub async fn pg_state() -> Option<(AppState, Pool<Postgres>, Arc<MockWorkflowDispatcher>)> {
    let pool = test_pool().await?;
    reset_tables(&pool).await;
    let argo = Arc::new(MockWorkflowDispatcher::new());
    let state = state_over(Arc::new(PgAppServeAppRepository::new(pool.clone())), argo.clone());
    Some((state, pool, argo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_database_yields_none() {
        assert!(build_test_pool("postgres://appserve@127.0.0.1:1/appserve_test".into()).await.is_none());
    }
}
