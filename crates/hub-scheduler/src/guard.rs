//! RAII registration handle.

use std::sync::Arc;

use uuid::Uuid;

use crate::registry::JobRegistry;

/// Keeps a job in the running set until dropped.
///
/// Dropping happens on normal completion, on error and during unwinding
/// when the task panics, so a crashed job never blocks later ones.
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    id: Uuid,
}

impl JobGuard {
    pub(crate) fn new(registry: Arc<JobRegistry>, id: Uuid) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

impl std::fmt::Debug for JobGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{JobCategory, JobInfo};
    use std::thread;

    #[test]
    fn test_guard_released_on_panic() {
        let registry = Arc::new(JobRegistry::new());
        let guard = registry
            .try_register(&JobInfo::new(JobCategory::Batch, "genes"))
            .unwrap();

        let handle = thread::spawn(move || {
            let _guard = guard;
            panic!("worker crashed");
        });
        assert!(handle.join().is_err());
        assert!(registry.is_empty());
    }
}
