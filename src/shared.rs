use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Cross-cutting state pooled between nodes of one build.
///
/// Currently a pool of named asynchronous locks, used by techs that touch
/// resources outside of their node directory.
#[derive(Clone, Default)]
pub struct SharedResources {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SharedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock named `name`, creating it on first use.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(name.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }
}

impl std::fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedResources(*)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_named_locks_are_shared() {
        let shared = SharedResources::new();
        let other = shared.clone();

        let guard = shared.lock("dist").await;
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(10), other.lock("dist"));
        assert!(blocked.await.is_err());

        let unrelated = other.lock("cache").await;
        drop(unrelated);

        drop(guard);
        let _guard = other.lock("dist").await;
    }
}
