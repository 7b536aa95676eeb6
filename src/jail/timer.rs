//! Cancellable deferred release tasks

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Ownership of one scheduled release.
///
/// Each timer carries an id that is handed to its task, so the task can check that the
/// record it fires for is still the one it was armed for.
#[derive(Debug)]
pub struct ReleaseTimer {
    id: Uuid,
    handle: JoinHandle<()>,
}

impl ReleaseTimer {
    /// Run `task(id)` after `delay` on the tokio runtime
    pub fn schedule<F, Fut>(delay: Duration, task: F) -> Self
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let fire = task(id);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        Self { id, handle }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop the task. Harmless once it already ran.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Let go of the handle without stopping the task. Used by the task itself.
    pub fn detach(self) {
        drop(self.handle);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
