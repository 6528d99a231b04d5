//! Process registry.
//!
//! The registry is the single source of truth for what is running and in
//! which state. Every other component reads and mutates process records
//! through it, and every applied status transition is broadcast as a
//! [`StatusUpdate`].

use crate::state::error::{RegistryError, RegistryResult};
use crate::state::process::{apply_transition, can_transition, create_record};
use rr_protocol::process_models::{
    FailureDetail, ProcessRecord, ProcessStatus, RunMode, StatusUpdate,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

const UPDATE_CAPACITY: usize = 256;

/// In-memory table of process records, keyed by process id.
///
/// Cloning is cheap and every clone observes the same table. Each operation
/// takes the table lock once, so operations are linearizable with respect to
/// each other.
#[derive(Clone)]
pub struct ProcessRegistry {
    records: Arc<RwLock<HashMap<String, ProcessRecord>>>,
    updates: broadcast::Sender<StatusUpdate>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            updates,
        }
    }

    /// Subscribe to status transitions applied from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    /// Register a new `pending` record with a fresh execution id.
    ///
    /// A terminal record with the same id is replaced.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if a record with this id is still active.
    pub async fn create(&self, process_id: &str, run_mode: RunMode) -> RegistryResult<ProcessRecord> {
        self.create_replacing(process_id, run_mode)
            .await
            .map(|(record, _)| record)
    }

    /// Like [`create`](Self::create), also handing back the terminal record
    /// that was replaced so a failed launch can [`withdraw`](Self::withdraw).
    pub async fn create_replacing(
        &self,
        process_id: &str,
        run_mode: RunMode,
    ) -> RegistryResult<(ProcessRecord, Option<ProcessRecord>)> {
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(process_id) {
            if existing.status.is_active() {
                return Err(RegistryError::DuplicateId(process_id.to_string()));
            }
        }

        let record = create_record(process_id, Uuid::new_v4(), run_mode);
        let replaced = records.insert(process_id.to_string(), record.clone());
        self.notify(&record);

        Ok((record, replaced))
    }

    /// Undo the creation of a `pending` record for `execution_id`, putting
    /// back the record it replaced.
    ///
    /// Returns `false` and changes nothing if the record has moved on.
    pub async fn withdraw(
        &self,
        process_id: &str,
        execution_id: Uuid,
        replaced: Option<ProcessRecord>,
    ) -> bool {
        let mut records = self.records.write().await;
        let ours = records.get(process_id).is_some_and(|r| {
            r.execution_id == execution_id && r.status == ProcessStatus::Pending
        });
        if !ours {
            return false;
        }

        match replaced {
            Some(previous) => {
                records.insert(process_id.to_string(), previous);
            }
            None => {
                records.remove(process_id);
            }
        }
        true
    }

    /// Record the OS handle and artifact of a spawned interpreter.
    pub async fn attach_process(
        &self,
        process_id: &str,
        pid: Option<u32>,
        artifact_path: PathBuf,
    ) -> RegistryResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(process_id)
            .ok_or_else(|| RegistryError::UnknownId(process_id.to_string()))?;

        record.pid = pid;
        record.artifact_path = Some(artifact_path);
        Ok(())
    }

    /// Move a record to `status`.
    ///
    /// # Errors
    ///
    /// - `UnknownId` if there is no record for `process_id`
    /// - `IllegalTransition` if the state machine forbids the move
    pub async fn transition(
        &self,
        process_id: &str,
        status: ProcessStatus,
        failure: Option<FailureDetail>,
    ) -> RegistryResult<ProcessRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(process_id)
            .ok_or_else(|| RegistryError::UnknownId(process_id.to_string()))?;

        if !can_transition(record.status, status) {
            return Err(RegistryError::IllegalTransition {
                process_id: process_id.to_string(),
                from: record.status,
                to: status,
            });
        }

        apply_transition(record, status, failure);
        let snapshot = record.clone();
        self.notify(&snapshot);

        Ok(snapshot)
    }

    /// Make the record of one execution terminal, first writer wins.
    ///
    /// Returns `true` if this call performed the transition and `false` if
    /// the record was already terminal or now belongs to another execution.
    ///
    /// # Errors
    ///
    /// - `UnknownId` if there is no record for `process_id`
    /// - `IllegalTransition` if `terminal` is not a terminal status, or the
    ///   record cannot reach it from where it is
    pub async fn settle(
        &self,
        process_id: &str,
        execution_id: Uuid,
        terminal: ProcessStatus,
        failure: Option<FailureDetail>,
    ) -> RegistryResult<bool> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(process_id)
            .ok_or_else(|| RegistryError::UnknownId(process_id.to_string()))?;

        if record.execution_id != execution_id || record.status.is_terminal() {
            return Ok(false);
        }

        if !terminal.is_terminal() || !can_transition(record.status, terminal) {
            return Err(RegistryError::IllegalTransition {
                process_id: process_id.to_string(),
                from: record.status,
                to: terminal,
            });
        }

        apply_transition(record, terminal, failure);
        let snapshot = record.clone();
        self.notify(&snapshot);

        Ok(true)
    }

    /// Count one more finished step. Returns the new total.
    pub async fn record_step(&self, process_id: &str) -> RegistryResult<u64> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(process_id)
            .ok_or_else(|| RegistryError::UnknownId(process_id.to_string()))?;

        record.steps_completed += 1;
        Ok(record.steps_completed)
    }

    pub async fn get(&self, process_id: &str) -> RegistryResult<ProcessRecord> {
        self.records
            .read()
            .await
            .get(process_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownId(process_id.to_string()))
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Vec<ProcessRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.process_id.cmp(&b.process_id))
        });
        records
    }

    pub async fn remove(&self, process_id: &str) -> Option<ProcessRecord> {
        self.records.write().await.remove(process_id)
    }

    /// Remove the terminal record of `execution_id` once `retention` has
    /// elapsed. A record replaced by a newer execution is left alone.
    pub fn reclaim_after(
        &self,
        process_id: &str,
        execution_id: Uuid,
        retention: Duration,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        let process_id = process_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(retention).await;

            let mut records = registry.records.write().await;
            let reclaimable = records
                .get(&process_id)
                .is_some_and(|r| r.execution_id == execution_id && r.status.is_terminal());

            if reclaimable {
                records.remove(&process_id);
                tracing::debug!(process_id = %process_id, "Reclaimed terminal process record");
            }
        })
    }

    fn notify(&self, record: &ProcessRecord) {
        // No subscribers is not an error.
        let _ = self.updates.send(StatusUpdate {
            process_id: record.process_id.clone(),
            execution_id: record.execution_id,
            status: record.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = ProcessRegistry::new();
        let record = registry.create("p1", RunMode::RunAll).await.unwrap();

        assert_eq!(record.status, ProcessStatus::Pending);
        assert_eq!(registry.get("p1").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_create_rejects_active_duplicate() {
        let registry = ProcessRegistry::new();
        registry.create("p1", RunMode::RunAll).await.unwrap();
        registry
            .transition("p1", ProcessStatus::Running, None)
            .await
            .unwrap();

        let result = registry.create("p1", RunMode::RunAll).await;
        assert_eq!(result, Err(RegistryError::DuplicateId("p1".to_string())));
    }

    #[tokio::test]
    async fn test_create_replaces_terminal_record() {
        let registry = ProcessRegistry::new();
        let first = registry.create("p1", RunMode::RunAll).await.unwrap();
        registry
            .settle("p1", first.execution_id, ProcessStatus::Stopped, None)
            .await
            .unwrap();

        let second = registry.create("p1", RunMode::StepByStep).await.unwrap();
        assert_ne!(first.execution_id, second.execution_id);
        assert_eq!(registry.get("p1").await.unwrap().status, ProcessStatus::Pending);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_restores_replaced_record() {
        let registry = ProcessRegistry::new();
        let first = registry.create("p1", RunMode::RunAll).await.unwrap();
        let failure = FailureDetail::new(Some(2), "boom".to_string());
        registry
            .settle("p1", first.execution_id, ProcessStatus::Failed, Some(failure))
            .await
            .unwrap();

        let (second, replaced) = registry
            .create_replacing("p1", RunMode::StepByStep)
            .await
            .unwrap();
        assert_eq!(replaced.as_ref().map(|r| r.execution_id), Some(first.execution_id));

        assert!(registry.withdraw("p1", second.execution_id, replaced).await);
        let restored = registry.get("p1").await.unwrap();
        assert_eq!(restored.execution_id, first.execution_id);
        assert_eq!(restored.status, ProcessStatus::Failed);
        assert_eq!(restored.failure.unwrap().diagnostic, "boom");
    }

    #[tokio::test]
    async fn test_withdraw_leaves_settled_record() {
        let registry = ProcessRegistry::new();
        let (record, replaced) = registry.create_replacing("p1", RunMode::RunAll).await.unwrap();
        assert!(replaced.is_none());
        registry
            .settle("p1", record.execution_id, ProcessStatus::Stopped, None)
            .await
            .unwrap();

        assert!(!registry.withdraw("p1", record.execution_id, None).await);
        assert_eq!(registry.get("p1").await.unwrap().status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = ProcessRegistry::new();

        assert_eq!(
            registry.get("ghost").await,
            Err(RegistryError::UnknownId("ghost".to_string()))
        );
        assert!(matches!(
            registry.transition("ghost", ProcessStatus::Running, None).await,
            Err(RegistryError::UnknownId(_))
        ));
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_record_untouched() {
        let registry = ProcessRegistry::new();
        registry.create("p1", RunMode::RunAll).await.unwrap();

        let result = registry
            .transition("p1", ProcessStatus::WaitingStep, None)
            .await;

        assert_eq!(
            result,
            Err(RegistryError::IllegalTransition {
                process_id: "p1".to_string(),
                from: ProcessStatus::Pending,
                to: ProcessStatus::WaitingStep,
            })
        );
        assert_eq!(registry.get("p1").await.unwrap().status, ProcessStatus::Pending);
    }

    #[tokio::test]
    async fn test_settle_first_writer_wins() {
        let registry = ProcessRegistry::new();
        let record = registry.create("p1", RunMode::StepByStep).await.unwrap();
        registry
            .transition("p1", ProcessStatus::Running, None)
            .await
            .unwrap();
        registry
            .transition("p1", ProcessStatus::WaitingStep, None)
            .await
            .unwrap();

        let stopped = registry
            .settle("p1", record.execution_id, ProcessStatus::Stopped, None)
            .await
            .unwrap();
        let failed = registry
            .settle(
                "p1",
                record.execution_id,
                ProcessStatus::Failed,
                Some(FailureDetail::new(Some(1), "late")),
            )
            .await
            .unwrap();

        assert!(stopped);
        assert!(!failed);
        let record = registry.get("p1").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Stopped);
        assert!(record.failure.is_none());
    }

    #[tokio::test]
    async fn test_settle_ignores_other_execution() {
        let registry = ProcessRegistry::new();
        registry.create("p1", RunMode::RunAll).await.unwrap();

        let settled = registry
            .settle("p1", Uuid::new_v4(), ProcessStatus::Stopped, None)
            .await
            .unwrap();

        assert!(!settled);
        assert_eq!(registry.get("p1").await.unwrap().status, ProcessStatus::Pending);
    }

    #[tokio::test]
    async fn test_settle_rejects_non_terminal_status() {
        let registry = ProcessRegistry::new();
        let record = registry.create("p1", RunMode::RunAll).await.unwrap();

        let result = registry
            .settle("p1", record.execution_id, ProcessStatus::Running, None)
            .await;
        assert!(matches!(result, Err(RegistryError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn test_updates_follow_transitions() {
        let registry = ProcessRegistry::new();
        let mut updates = registry.subscribe();

        let record = registry.create("p1", RunMode::RunAll).await.unwrap();
        registry
            .transition("p1", ProcessStatus::Running, None)
            .await
            .unwrap();
        registry
            .settle("p1", record.execution_id, ProcessStatus::Completed, None)
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(updates.recv().await.unwrap().status);
        }
        assert_eq!(
            seen,
            vec![
                ProcessStatus::Pending,
                ProcessStatus::Running,
                ProcessStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_attach_and_record_step() {
        let registry = ProcessRegistry::new();
        registry.create("p1", RunMode::RunAll).await.unwrap();

        registry
            .attach_process("p1", Some(4242), PathBuf::from("/tmp/robot_p1.json"))
            .await
            .unwrap();
        assert_eq!(registry.record_step("p1").await.unwrap(), 1);
        assert_eq!(registry.record_step("p1").await.unwrap(), 2);

        let record = registry.get("p1").await.unwrap();
        assert_eq!(record.pid, Some(4242));
        assert_eq!(record.steps_completed, 2);
        assert_eq!(
            record.artifact_path,
            Some(PathBuf::from("/tmp/robot_p1.json"))
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ProcessRegistry::new();
        registry.create("p1", RunMode::RunAll).await.unwrap();

        assert!(registry.remove("p1").await.is_some());
        assert!(registry.remove("p1").await.is_none());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_after_retention() {
        let registry = ProcessRegistry::new();
        let record = registry.create("p1", RunMode::RunAll).await.unwrap();
        registry
            .settle("p1", record.execution_id, ProcessStatus::Failed, None)
            .await
            .unwrap();

        let handle = registry.reclaim_after("p1", record.execution_id, Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(registry.get("p1").await.is_ok());

        handle.await.unwrap();
        assert!(registry.get("p1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_skips_replaced_record() {
        let registry = ProcessRegistry::new();
        let first = registry.create("p1", RunMode::RunAll).await.unwrap();
        registry
            .settle("p1", first.execution_id, ProcessStatus::Stopped, None)
            .await
            .unwrap();

        let handle = registry.reclaim_after("p1", first.execution_id, Duration::from_secs(1));
        let second = registry.create("p1", RunMode::RunAll).await.unwrap();

        handle.await.unwrap();
        assert_eq!(
            registry.get("p1").await.unwrap().execution_id,
            second.execution_id
        );
    }
}
