use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::Context;
use super::entity::{CompensationRecord, StepError, StepExecution, WorkflowInstance};
use super::ids::WorkflowId;
use super::status::{CompensationResult, StepStatus, WorkflowStatus};
use super::store::StateStore;
use crate::error::Result;

const WORKFLOWS_GROUP: &str = "flowforge:workflows";

fn steps_group(workflow_id: &WorkflowId) -> String {
    format!("flowforge:steps:{workflow_id}")
}

fn compensations_group(workflow_id: &WorkflowId) -> String {
    format!("flowforge:compensations:{workflow_id}")
}

/// The result of [`Persistence::get_workflow_history`]: the instance plus
/// its step executions (ascending by `started_at`) and compensation
/// records (ascending by `registered_at`) — the read model used by §6's
/// `GET /workflows/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub instance: WorkflowInstance,
    pub steps: Vec<StepExecution>,
    pub compensations: Vec<CompensationRecord>,
}

/// Optional fields accepted by [`Persistence::update_workflow_status`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowStatusUpdate {
    pub current_step: Option<Option<String>>,
    pub context_delta: Option<Context>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
}

/// Idempotent, guarded CRUD over workflow instances, step executions, and
/// compensation records (C2, §4.2), implemented entirely by read-modify-write
/// against a [`StateStore`]. No SQL lives here; concrete backends live in
/// `flowforge-runtime`.
pub struct Persistence<S: StateStore> {
    store: S,
}

impl<S: StateStore> Persistence<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn get_raw<T: for<'de> Deserialize<'de>>(
        &self,
        group: &str,
        key: &str,
    ) -> Result<Option<T>> {
        match self.store.get(group, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn put_raw<T: Serialize>(
        &self,
        group: &str,
        key: &str,
        value: &T,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store
            .set(group, key, value, expected_version)
            .await?;
        Ok(())
    }

    // ---- Workflow instance operations ----

    /// Creates the instance in status `running` iff none exists at `id`.
    /// If one already exists, returns it unchanged (used by `startWorkflow`
    /// for idempotent starts).
    pub async fn create_workflow(
        &self,
        id: WorkflowId,
        workflow_type: &str,
        first_step: &str,
        context: Context,
    ) -> Result<WorkflowInstance> {
        if let Some(existing) = self.get_workflow(&id).await? {
            return Ok(existing);
        }
        let now = Utc::now();
        let instance = WorkflowInstance::new(
            id.clone(),
            workflow_type,
            first_step.to_string(),
            context,
            now,
        );
        self.put_raw(WORKFLOWS_GROUP, id.as_str(), &instance, None)
            .await?;
        Ok(instance)
    }

    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowInstance>> {
        self.get_raw(WORKFLOWS_GROUP, id.as_str()).await
    }

    /// Merges `update.context_delta` into context, applies the optional
    /// fields, clears `current_step` to `None` when `new_status` is
    /// terminal and no explicit value was provided, sets `status` last,
    /// bumps `updated_at`. Silently refuses transitions outside the
    /// status graph (§3 invariant 4) by returning the unchanged record.
    pub async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        new_status: WorkflowStatus,
        update: WorkflowStatusUpdate,
    ) -> Result<Option<WorkflowInstance>> {
        let Some(mut instance) = self.get_workflow(id).await? else {
            return Ok(None);
        };

        if !instance.status.can_transition_to(new_status) {
            tracing::warn!(
                workflow_id = %id,
                from = %instance.status,
                to = %new_status,
                "rejected illegal workflow status transition"
            );
            return Ok(Some(instance));
        }

        if let Some(delta) = &update.context_delta {
            instance.context.merge(delta);
        }
        if let Some(step) = update.current_step {
            instance.current_step = step;
        } else if new_status.is_terminal() {
            instance.current_step = None;
        }
        if let Some(failed_step) = update.failed_step {
            instance.failed_step = Some(failed_step);
        }
        if let Some(error) = update.error {
            instance.error = Some(error);
        }
        instance.status = new_status;
        instance.updated_at = Utc::now();
        let expected_version = instance.version;
        instance.version += 1;

        self.put_raw(WORKFLOWS_GROUP, id.as_str(), &instance, Some(expected_version))
            .await?;
        Ok(Some(instance))
    }

    /// Merges `delta` into context. No-op (returns `None`) if the instance
    /// doesn't exist or is terminal.
    pub async fn update_workflow_context(
        &self,
        id: &WorkflowId,
        delta: &Context,
    ) -> Result<Option<WorkflowInstance>> {
        let Some(mut instance) = self.get_workflow(id).await? else {
            return Ok(None);
        };
        if instance.status.is_terminal() {
            tracing::warn!(workflow_id = %id, "refused context update on terminal workflow");
            return Ok(Some(instance));
        }
        instance.context.merge(delta);
        instance.updated_at = Utc::now();
        let expected_version = instance.version;
        instance.version += 1;
        self.put_raw(WORKFLOWS_GROUP, id.as_str(), &instance, Some(expected_version))
            .await?;
        Ok(Some(instance))
    }

    /// Sets `current_step = next_step`, merges `context_delta`. No-op unless
    /// the instance exists and its status is `running`.
    pub async fn advance_to_step(
        &self,
        id: &WorkflowId,
        next_step: &str,
        context_delta: Option<&Context>,
    ) -> Result<Option<WorkflowInstance>> {
        let Some(mut instance) = self.get_workflow(id).await? else {
            return Ok(None);
        };
        if instance.status != WorkflowStatus::Running {
            tracing::warn!(
                workflow_id = %id,
                status = %instance.status,
                "refused advanceToStep on non-running workflow"
            );
            return Ok(Some(instance));
        }
        if let Some(delta) = context_delta {
            instance.context.merge(delta);
        }
        instance.current_step = Some(next_step.to_string());
        instance.updated_at = Utc::now();
        let expected_version = instance.version;
        instance.version += 1;
        self.put_raw(WORKFLOWS_GROUP, id.as_str(), &instance, Some(expected_version))
            .await?;
        Ok(Some(instance))
    }

    // ---- Step execution operations ----

    pub async fn get_step(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        self.get_raw(&steps_group(workflow_id), step_name).await
    }

    /// Idempotent create: if the record already exists, returns it
    /// unchanged along with `is_new = false`; otherwise inserts a `running`
    /// record and returns `is_new = true`.
    pub async fn record_step_start(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        input_snapshot: Context,
        attempt: Option<u32>,
    ) -> Result<(StepExecution, bool)> {
        if let Some(existing) = self.get_step(workflow_id, step_name).await? {
            return Ok((existing, false));
        }
        let execution = StepExecution::new(
            workflow_id.clone(),
            step_name,
            input_snapshot,
            attempt.unwrap_or(1),
            Utc::now(),
        );
        self.put_raw(&steps_group(workflow_id), step_name, &execution, None)
            .await?;
        Ok((execution, true))
    }

    /// Transitions to `completed`, sets `output`/`completed_at`. Any record
    /// already in a terminal status is treated as unmodifiable and returned
    /// as-is (§4.2 "Terminal-overwrite protection").
    pub async fn record_step_complete(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        output: Value,
    ) -> Result<Option<StepExecution>> {
        let Some(mut execution) = self.get_step(workflow_id, step_name).await? else {
            return Ok(None);
        };
        if execution.status.is_terminal() {
            return Ok(Some(execution));
        }
        execution.status = StepStatus::Completed;
        execution.output = Some(output);
        execution.completed_at = Some(Utc::now());
        let expected_version = execution.version;
        execution.version += 1;
        self.put_raw(
            &steps_group(workflow_id),
            step_name,
            &execution,
            Some(expected_version),
        )
        .await?;
        Ok(Some(execution))
    }

    /// Transitions to `failed`, sets `error`/`completed_at`. Terminal
    /// records are unmodifiable (§4.2).
    pub async fn record_step_failure(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        error: StepError,
    ) -> Result<Option<StepExecution>> {
        let Some(mut execution) = self.get_step(workflow_id, step_name).await? else {
            return Ok(None);
        };
        if execution.status.is_terminal() {
            return Ok(Some(execution));
        }
        execution.status = StepStatus::Failed;
        execution.error = Some(error);
        execution.completed_at = Some(Utc::now());
        let expected_version = execution.version;
        execution.version += 1;
        self.put_raw(
            &steps_group(workflow_id),
            step_name,
            &execution,
            Some(expected_version),
        )
        .await?;
        Ok(Some(execution))
    }

    /// Transitions to `compensated`, sets `completed_at`. Applies
    /// regardless of current status (a step must be `completed` to have a
    /// compensation registered against it, so this only ever fires from
    /// that state in practice).
    pub async fn mark_step_compensated(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let Some(mut execution) = self.get_step(workflow_id, step_name).await? else {
            return Ok(None);
        };
        execution.status = StepStatus::Compensated;
        execution.completed_at = Some(Utc::now());
        let expected_version = execution.version;
        execution.version += 1;
        self.put_raw(
            &steps_group(workflow_id),
            step_name,
            &execution,
            Some(expected_version),
        )
        .await?;
        Ok(Some(execution))
    }

    // ---- Compensation record operations ----

    pub async fn get_compensation(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
    ) -> Result<Option<CompensationRecord>> {
        self.get_raw(&compensations_group(workflow_id), step_name)
            .await
    }

    /// Idempotent create: if a record already exists for `step_name`,
    /// returns it unchanged; otherwise inserts with `registered_at = now`,
    /// `executed = false`.
    pub async fn register_compensation(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        compensation_name: &str,
        step_index: usize,
    ) -> Result<(CompensationRecord, bool)> {
        if let Some(existing) = self.get_compensation(workflow_id, step_name).await? {
            return Ok((existing, false));
        }
        let record = CompensationRecord::new(
            workflow_id.clone(),
            step_name,
            compensation_name,
            step_index,
            Utc::now(),
        );
        self.put_raw(
            &compensations_group(workflow_id),
            step_name,
            &record,
            None,
        )
        .await?;
        Ok((record, true))
    }

    /// Returns compensation records with `executed = false`, sorted by
    /// `registered_at` descending (reverse registration order), with ties
    /// broken by `step_index` descending so LIFO order is deterministic
    /// even within the same millisecond (§4.2 "Numeric/ordering semantics").
    pub async fn get_pending_compensations(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<CompensationRecord>> {
        let values = self.store.get_group(&compensations_group(workflow_id)).await?;
        let mut records: Vec<CompensationRecord> = values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;
        records.retain(|r| !r.executed);
        records.sort_by(|a, b| {
            b.registered_at
                .cmp(&a.registered_at)
                .then_with(|| b.step_index.cmp(&a.step_index))
        });
        Ok(records)
    }

    /// Sets `executed = true`, `executed_at`, `result`, `error`. No-op if
    /// already `executed = true`.
    pub async fn mark_compensation_executed(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        result: CompensationResult,
        error: Option<String>,
    ) -> Result<Option<CompensationRecord>> {
        let Some(mut record) = self.get_compensation(workflow_id, step_name).await? else {
            return Ok(None);
        };
        if record.executed {
            return Ok(Some(record));
        }
        record.executed = true;
        record.executed_at = Some(Utc::now());
        record.result = Some(result);
        record.error = error;
        let expected_version = record.version;
        record.version += 1;
        self.put_raw(
            &compensations_group(workflow_id),
            step_name,
            &record,
            Some(expected_version),
        )
        .await?;
        Ok(Some(record))
    }

    /// Returns the instance plus all step executions (ascending by
    /// `started_at`) and all compensation records (ascending by
    /// `registered_at`) — the §6 `GET /workflows/:id` read model.
    pub async fn get_workflow_history(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowHistory>> {
        let Some(instance) = self.get_workflow(workflow_id).await? else {
            return Ok(None);
        };

        let step_values = self.store.get_group(&steps_group(workflow_id)).await?;
        let mut steps: Vec<StepExecution> = step_values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;
        steps.sort_by_key(|s: &StepExecution| s.started_at);

        let comp_values = self
            .store
            .get_group(&compensations_group(workflow_id))
            .await?;
        let mut compensations: Vec<CompensationRecord> = comp_values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;
        compensations.sort_by_key(|c: &CompensationRecord| c.registered_at);

        Ok(Some(WorkflowHistory {
            instance,
            steps,
            compensations,
        }))
    }

    /// Every workflow instance, sorted by `created_at` descending — the
    /// §6 `GET /workflows` read model.
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowInstance>> {
        let values = self.store.get_group(WORKFLOWS_GROUP).await?;
        let mut instances: Vec<WorkflowInstance> = values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?;
        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_support::MemStore;

    fn persistence() -> Persistence<MemStore> {
        Persistence::new(MemStore::new())
    }

    #[tokio::test]
    async fn create_workflow_is_idempotent() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        let a = p
            .create_workflow(id.clone(), "order", "ValidateOrder", Context::new())
            .await
            .unwrap();
        let b = p
            .create_workflow(id.clone(), "order", "ValidateOrder", Context::new())
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_at, b.created_at);
    }

    #[tokio::test]
    async fn record_step_complete_protects_terminal_status() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        p.record_step_start(&id, "ChargePayment", Context::new(), None)
            .await
            .unwrap();
        let completed = p
            .record_step_complete(&id, "ChargePayment", serde_json::json!({"ok": true}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, StepStatus::Completed);

        // A second completion attempt with a different payload must not
        // overwrite the first.
        let replayed = p
            .record_step_complete(&id, "ChargePayment", serde_json::json!({"ok": false}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.output, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn record_step_start_is_idempotent() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        let (_, is_new_1) = p
            .record_step_start(&id, "ValidateOrder", Context::new(), None)
            .await
            .unwrap();
        let (_, is_new_2) = p
            .record_step_start(&id, "ValidateOrder", Context::new(), None)
            .await
            .unwrap();
        assert!(is_new_1);
        assert!(!is_new_2);
    }

    #[tokio::test]
    async fn pending_compensations_sorted_descending_with_index_tiebreak() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        p.register_compensation(&id, "ChargePayment", "RefundPayment", 1)
            .await
            .unwrap();
        p.register_compensation(&id, "ReserveInventory", "ReleaseInventory", 2)
            .await
            .unwrap();
        let pending = p.get_pending_compensations(&id).await.unwrap();
        let names: Vec<&str> = pending.iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(names, vec!["ReserveInventory", "ChargePayment"]);
    }

    #[tokio::test]
    async fn mark_compensation_executed_is_idempotent() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        p.register_compensation(&id, "ChargePayment", "RefundPayment", 1)
            .await
            .unwrap();
        p.mark_compensation_executed(&id, "ChargePayment", CompensationResult::Success, None)
            .await
            .unwrap();
        let second = p
            .mark_compensation_executed(
                &id,
                "ChargePayment",
                CompensationResult::Failed,
                Some("ignored".to_string()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.result, Some(CompensationResult::Success));
        assert_eq!(second.error, None);
    }

    #[tokio::test]
    async fn update_workflow_status_rejects_illegal_transition() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        p.create_workflow(id.clone(), "order", "ValidateOrder", Context::new())
            .await
            .unwrap();
        p.update_workflow_status(&id, WorkflowStatus::Completed, WorkflowStatusUpdate::default())
            .await
            .unwrap();
        // completed -> running is not in the transition graph.
        let result = p
            .update_workflow_status(&id, WorkflowStatus::Running, WorkflowStatusUpdate::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn update_workflow_status_clears_current_step_on_terminal() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        p.create_workflow(id.clone(), "order", "NotifyUser", Context::new())
            .await
            .unwrap();
        let result = p
            .update_workflow_status(&id, WorkflowStatus::Completed, WorkflowStatusUpdate::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.current_step, None);
    }

    #[tokio::test]
    async fn workflow_history_orders_ascending() {
        let p = persistence();
        let id = WorkflowId::from_string("wf-1");
        p.create_workflow(id.clone(), "order", "ValidateOrder", Context::new())
            .await
            .unwrap();
        p.record_step_start(&id, "ValidateOrder", Context::new(), None)
            .await
            .unwrap();
        p.record_step_start(&id, "ChargePayment", Context::new(), None)
            .await
            .unwrap();
        let history = p.get_workflow_history(&id).await.unwrap().unwrap();
        assert_eq!(history.steps.len(), 2);
        assert!(history.steps[0].started_at <= history.steps[1].started_at);
    }

    #[tokio::test]
    async fn list_workflows_orders_by_created_at_descending() {
        let p = persistence();
        p.create_workflow(
            WorkflowId::from_string("wf-1"),
            "order",
            "ValidateOrder",
            Context::new(),
        )
        .await
        .unwrap();
        p.create_workflow(
            WorkflowId::from_string("wf-2"),
            "order",
            "ValidateOrder",
            Context::new(),
        )
        .await
        .unwrap();

        let all = p.list_workflows().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at >= all[1].created_at);
    }
}
