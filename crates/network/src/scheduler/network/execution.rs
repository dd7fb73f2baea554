//! Run engine: per-node run decisions and completion handling.

use serde::Serialize;
use tracing::{debug, info, warn};

use tidemark_core::{DataId, NodeId, NodeState, Pointer, Task, TaskId};

use crate::error::{NetworkError, Result};
use crate::scheduler::pool::Job;

use super::core::Notice;
use super::ExpressionNetwork;

const INVALID_REASON: &str = "node is invalid due to upstream or self invalidation";
const REFUSED_REASON: &str = "executor refused: no available slot";

/// What a run attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "taskId")]
pub enum RunOutcome {
    /// Already running; one follow-up attempt is owed.
    Deferred,
    /// Node is invalid; nothing dispatched.
    Invalid,
    /// Expected pointer not ahead of effective.
    UpToDate,
    /// The triggering upstream moved on before the attempt ran.
    Stale,
    Started(TaskId),
    /// Executor declined; node state unchanged.
    Refused(TaskId),
    /// Executor unreachable.
    SystemFailed(TaskId),
}

impl ExpressionNetwork {
    /// Attempt a run of `id` now.
    pub async fn try_run_expression_node(&self, id: &NodeId) -> Result<RunOutcome> {
        let _activity = self.activity.enter();
        self.try_run(id, None).await
    }

    /// External force-run request. With `force`, the performance pass is
    /// redone on the next success.
    pub async fn run_expression(&self, id: &NodeId, force: bool) -> Result<RunOutcome> {
        let _activity = self.activity.enter();
        if force {
            let _guard = self.locks.lock(id).await;
            let mut node = self.node(id).await?;
            if node.is_perf_calculated {
                node.is_perf_calculated = false;
                self.nodes.save(&node).await?;
            }
        }
        self.try_run(id, None).await
    }

    pub(super) async fn try_run(&self, id: &NodeId, source: Option<(DataId, Pointer)>) -> Result<RunOutcome> {
        let _guard = self.locks.lock(id).await;

        if self.states.is_running(id) {
            if self.states.mark_pending(id) {
                self.record(|m| m.retries_deferred += 1);
            }
            debug!(node = %id, "Already running, retry deferred");
            return Ok(RunOutcome::Deferred);
        }

        let mut node = self.node(id).await?;

        if let Some((upstream, seen)) = source {
            let live = self.node(&upstream).await?.effective_ptr;
            if live != seen {
                warn!(
                    node = %id,
                    upstream = %upstream,
                    seen = %seen,
                    live = %live,
                    "Stale propagation discarded"
                );
                self.record(|m| m.stale_discards += 1);
                return Ok(RunOutcome::Stale);
            }
        }

        if !node.valid {
            self.publish(id, Notice::Failed(INVALID_REASON)).await;
            return Ok(RunOutcome::Invalid);
        }

        let expected = self.find_expected_ptr(&node).await?;
        if expected != node.expected_ptr {
            node.expected_ptr = expected;
            self.nodes.save(&node).await?;
        }

        if !node.should_run() {
            if self.perf.is_some() && !node.is_perf_calculated && node.effective_ptr > Pointer::ZERO {
                self.submit(Job::Perf(id.clone()));
            }
            return Ok(RunOutcome::UpToDate);
        }

        self.dispatch(id, Task::for_node(&node)).await
    }

    /// Hand `task` to the executor. Caller holds the node lock.
    ///
    /// The task is stored before the call so a completion report racing the
    /// return value can always find it.
    async fn dispatch(&self, id: &NodeId, mut task: Task) -> Result<RunOutcome> {
        self.tasks.save(&task).await?;

        match self.executor.run(&task).await {
            Ok(true) => {
                self.states.set(id, NodeState::Running);
                self.record(|m| m.runs_started += 1);
                info!(node = %id, task = %task.id, from = %task.from, to = %task.to, "Run started");
                self.publish(id, Notice::Running).await;
                Ok(RunOutcome::Started(task.id))
            }
            Ok(false) => {
                task.conclude(Some(REFUSED_REASON.to_string()));
                self.tasks.save(&task).await?;
                self.record(|m| m.runs_refused += 1);
                info!(node = %id, task = %task.id, "Run refused by executor");
                Ok(RunOutcome::Refused(task.id))
            }
            Err(e) => {
                let reason = e.to_string();
                self.states.set(id, NodeState::SystemFailed);
                self.record(|m| m.runs_system_failed += 1);
                warn!(node = %id, task = %task.id, error = %e, "Executor unreachable");
                self.publish(id, Notice::SystemFailed(&reason)).await;
                task.conclude(Some(reason));
                if let Err(e) = self.tasks.save(&task).await {
                    warn!(task = %task.id, error = %e, "Failed to record system failure");
                }
                Ok(RunOutcome::SystemFailed(task.id))
            }
        }
    }

    async fn open_task(&self, task_id: &TaskId) -> Result<(Task, NodeId)> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| NetworkError::TaskNotFound(task_id.clone()))?;
        let id = task
            .node_id()
            .cloned()
            .ok_or_else(|| NetworkError::InvalidExpression(format!("task {} has no output", task_id)))?;
        Ok((task, id))
    }

    /// Executor reports `task_id` completed: advance the node and propagate.
    pub async fn succeed_run(&self, task_id: &TaskId) -> Result<()> {
        let _activity = self.activity.enter();
        let (_, id) = self.open_task(task_id).await?;

        let (node, retry) = {
            let _guard = self.locks.lock(&id).await;
            // Re-read under the lock so a duplicate report sees the first one.
            let (mut task, _) = self.open_task(task_id).await?;
            if task.is_concluded() {
                warn!(node = %id, task = %task_id, "Success reported for concluded task, ignored");
                return Ok(());
            }
            let mut node = self.node(&id).await?;
            self.states.set(&id, NodeState::Finished);
            let retry = self.states.take_pending(&id);

            if node.valid {
                node.effective_ptr = task.to;
            } else {
                warn!(node = %id, task = %task_id, "Success reported for invalid node, pointer kept");
            }
            if !node.is_perf_calculated {
                if let Some(perf) = &self.perf {
                    match perf.calculate(&id).await {
                        Ok(()) => node.is_perf_calculated = true,
                        Err(e) => warn!(node = %id, error = %e, "Performance calculation failed"),
                    }
                }
            }
            self.nodes.save(&node).await?;

            task.conclude(None);
            self.tasks.save(&task).await?;
            let elapsed = (chrono::Utc::now() - task.start).to_std().unwrap_or_default();
            self.record(|m| m.record_finished(elapsed));
            self.publish(&id, Notice::Finished).await;
            (node, retry)
        };

        info!(node = %id, task = %task_id, effective = %node.effective_ptr, "Run finished");
        self.update_downstream(&node).await?;
        if retry {
            self.retry(&id).await;
        }
        Ok(())
    }

    /// Executor reports a logical failure: poison the node and everything
    /// derived from it.
    pub async fn failed_run(&self, task_id: &TaskId, reason: &str) -> Result<()> {
        let _activity = self.activity.enter();
        let (mut task, id) = self.open_task(task_id).await?;

        {
            let _guard = self.locks.lock(&id).await;
            self.states.set(&id, NodeState::Failed);
            if self.states.take_pending(&id) {
                debug!(node = %id, "Pending retry dropped after failure");
            }
            task.conclude(Some(reason.to_string()));
            self.tasks.save(&task).await?;
            self.record(|m| m.runs_failed += 1);
            self.publish(&id, Notice::Failed(reason)).await;
        }

        warn!(node = %id, task = %task_id, reason, "Run failed, invalidating downstream");
        self.invalidate_downstream(&id).await?;
        Ok(())
    }

    /// Executor could not carry out `task_id`. The node stays valid.
    pub async fn system_failed_run(&self, task_id: &TaskId, reason: &str) -> Result<()> {
        let _activity = self.activity.enter();
        let (mut task, id) = self.open_task(task_id).await?;

        let retry = {
            let _guard = self.locks.lock(&id).await;
            self.states.set(&id, NodeState::SystemFailed);
            let retry = self.states.take_pending(&id);
            task.conclude(Some(reason.to_string()));
            self.tasks.save(&task).await?;
            self.record(|m| m.runs_system_failed += 1);
            self.publish(&id, Notice::SystemFailed(reason)).await;
            retry
        };

        warn!(node = %id, task = %task_id, reason, "Run system-failed");
        if retry {
            self.retry(&id).await;
        }
        Ok(())
    }

    async fn retry(&self, id: &NodeId) {
        match self.try_run(id, None).await {
            Ok(outcome) => debug!(node = %id, ?outcome, "Pending retry"),
            Err(e) => warn!(node = %id, error = %e, "Pending retry failed"),
        }
    }

    /// Reissue `task_id` over the same range under a new id. The earlier
    /// remote computation is not stopped.
    pub async fn rerun(&self, task_id: &TaskId) -> Result<RunOutcome> {
        let _activity = self.activity.enter();
        let (task, id) = self.open_task(task_id).await?;

        let _guard = self.locks.lock(&id).await;
        self.tasks.delete(task_id).await?;
        let fresh = task.reissue();
        info!(node = %id, old = %task_id, new = %fresh.id, "Task reissued");
        self.dispatch(&id, fresh).await
    }

    /// Deferred performance calculation for a node that has data.
    pub(super) async fn performance_pass(&self, id: &NodeId) -> Result<()> {
        let Some(perf) = &self.perf else { return Ok(()) };
        let _guard = self.locks.lock(id).await;
        let mut node = self.node(id).await?;
        if node.is_perf_calculated || node.effective_ptr == Pointer::ZERO {
            return Ok(());
        }
        perf.calculate(id).await?;
        node.is_perf_calculated = true;
        self.nodes.save(&node).await?;
        debug!(node = %id, "Performance calculated");
        Ok(())
    }
}
