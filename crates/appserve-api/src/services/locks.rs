use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per application id. Held across validate → persist →
/// dispatch so two lifecycle requests on the same app in this process run
/// one after the other. Other replicas are not covered.
#[derive(Default)]
pub struct AppLocks { inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>> }

impl AppLocks {
    pub fn new() -> Self { Self::default() }

    pub async fn acquire(&self, app_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // Drop entries nobody holds or waits on.
            map.retain(|id, l| *id == app_id || Arc::strong_count(l) > 1);
            map.entry(app_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
