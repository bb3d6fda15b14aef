use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::executor::TransportExecutor;
use crate::repo::RepositorySettings;

/// Abstraction over the state required by Git HTTP handlers.
pub trait GitHttpState: Clone + Send + Sync + 'static {
    type Executor: TransportExecutor;

    fn executor(&self) -> &Self::Executor;
    fn settings(&self) -> &RepositorySettings;
    /// Bounds concurrently running transport processes; a permit is held until
    /// the streamed response finishes.
    fn git_semaphore(&self) -> &Arc<Semaphore>;
    fn allow_push(&self) -> bool;
}
