//! Contracts of the external collaborators the scheduler calls out to.

use async_trait::async_trait;

use tidemark_core::{DataId, Symbol, Task, TaskId};

use crate::error::ServiceError;

/// Remote executor doing the actual computation.
///
/// Completion is reported back asynchronously through
/// `ExpressionNetwork::succeed_run` / `failed_run` / `system_failed_run`,
/// never as a return value of [`Executor::run`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// Dispatch `task`. `Ok(true)` means the work was started, `Ok(false)`
    /// means it was refused (e.g. no free slot). An `Err` means the executor
    /// could not be reached.
    async fn run(&self, task: &Task) -> Result<bool, ServiceError>;

    /// Ask the executor to stop a task. Best effort.
    async fn try_cancel(&self, id: &TaskId) -> Result<(), ServiceError>;

    /// Drop the computed values of `id`.
    async fn delete_data(&self, id: &DataId) -> Result<(), ServiceError>;
}

/// Fire-and-forget notification sink keyed by data id.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn push_running(&self, id: &DataId) -> Result<(), ServiceError>;

    async fn push_run_failed(&self, id: &DataId, reason: &str) -> Result<(), ServiceError>;

    async fn push_run_finish(&self, id: &DataId) -> Result<(), ServiceError>;

    async fn push_system_failed(&self, id: &DataId, reason: &str) -> Result<(), ServiceError>;
}

/// Post-processing after a successful run.
#[async_trait]
pub trait PerformanceService: Send + Sync {
    async fn calculate(&self, id: &DataId) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait SymbolLibraryService: Send + Sync {
    async fn get_symbol(&self, id: &DataId) -> Result<Symbol, ServiceError>;
}

/// Metadata and inspection side channel.
#[async_trait]
pub trait DataInfo: Send + Sync {
    async fn get_express_data_info(
        &self,
        id: &DataId,
        start: Option<&str>,
        end: Option<&str>,
        need_perf: Option<&str>,
    ) -> Result<String, ServiceError>;

    async fn delete_data(&self, id: &DataId) -> Result<(), ServiceError>;
}
