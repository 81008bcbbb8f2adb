//! Tracking for fire-and-forget work spawned off a request path (CRM sync
//! after a tier change or booking), so shutdown and tests can wait for it.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct TaskTracker {
    tasks: Arc<Mutex<HashMap<u64, (String, JoinHandle<()>)>>>,
    next_id: AtomicU64,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Spawn a task that removes itself from the tracker when it finishes.
    pub async fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        let tasks = self.tasks.clone();
        let task_name = name.clone();

        // Insert before the task can finish and try to remove itself
        let mut guard = self.tasks.lock().await;
        let handle = tokio::spawn(async move {
            future.await;
            tasks.lock().await.remove(&id);
            debug!("task '{}' finished", task_name);
        });
        guard.insert(id, (name, handle));
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait until every tracked task, including ones spawned while waiting,
    /// has finished.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<(String, JoinHandle<()>)> = {
                let mut guard = self.tasks.lock().await;
                guard.drain().map(|(_, task)| task).collect()
            };
            if pending.is_empty() {
                return;
            }
            for (name, handle) in pending {
                if let Err(e) = handle.await
                    && !e.is_cancelled()
                {
                    warn!("task '{}' panicked: {}", name, e);
                }
            }
        }
    }

    pub async fn cancel_all(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut guard = self.tasks.lock().await;
            guard.drain().map(|(_, task)| task).collect()
        };
        let count = tasks.len();
        for (name, handle) in tasks {
            handle.abort();
            debug!("cancelled task '{}'", name);
        }
        if count > 0 {
            info!("cancelled {} background tasks", count);
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
