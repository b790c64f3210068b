//! Stateless business logic for reindex operations.
//!
//! Each call to [`ReindexService::process_next_step`] advances one operation
//! exactly one step under an exclusive lease on its record. Safety across
//! coordinator processes comes entirely from the lease timestamp and the
//! store's compare-and-swap updates; the service holds no in-process locks
//! across I/O.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::cluster::{AliasAction, ClusterClient, MIN_ML_NODE_VERSION, parse_version};
use crate::error::ReindexError;
use crate::index_settings::{
    boolean_coercion_script, boolean_field_paths, mapping_body, transform_flat_settings,
};
use crate::models::{
    LOCK_WINDOW_SECS, ML_COUNTER_ID, ReindexOperation, ReindexStatus, ReindexStep, ReindexWarning,
    StoredMlCounter, StoredOperation, is_ml_index,
};
use crate::retry::{RetryConfig, with_retry};
use crate::store::ReindexStore;
use crate::warnings;

/// Probes for a free destination index name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 100;

pub struct ReindexService {
    store: Arc<dyn ReindexStore>,
    cluster: Arc<dyn ClusterClient>,
    retry: RetryConfig,
}

impl ReindexService {
    pub fn new(store: Arc<dyn ReindexStore>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            store,
            cluster,
            retry: RetryConfig::default(),
        }
    }

    /// Override the backoff used when contending for the ML counter lock.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Advisory warnings for an index, or `None` if it does not exist.
    pub async fn detect_reindex_warnings(
        &self,
        index_name: &str,
    ) -> Result<Option<Vec<ReindexWarning>>, ReindexError> {
        match self.cluster.flat_settings(index_name).await? {
            None => Ok(None),
            Some(flat) => Ok(Some(warnings::detect(index_name, &flat))),
        }
    }

    /// Create a new operation record for an index. A prior failed or
    /// cancelled record is deleted and replaced; any other existing record
    /// is a conflict.
    pub async fn create_reindex_operation(
        &self,
        index_name: &str,
    ) -> Result<StoredOperation, ReindexError> {
        if !self.cluster.index_exists(index_name).await? {
            return Err(ReindexError::IndexNotFound(index_name.to_string()));
        }

        for existing in self.store.operations_by_index(index_name).await? {
            match existing.attributes.status {
                ReindexStatus::Failed | ReindexStatus::Cancelled => {
                    debug!(index = index_name, "deleting terminated operation for retry");
                    self.store.delete_operation(&existing).await?;
                }
                _ => return Err(ReindexError::OperationExists(index_name.to_string())),
            }
        }

        let new_index_name = self.generate_new_index_name(index_name).await?;
        let doc = self
            .store
            .create_operation(ReindexOperation::new(index_name, new_index_name))
            .await?;
        info!(
            index = index_name,
            new_index = %doc.attributes.new_index_name,
            "reindex operation created"
        );
        Ok(doc)
    }

    async fn generate_new_index_name(&self, index_name: &str) -> Result<String, ReindexError> {
        for n in 0..MAX_NAME_ATTEMPTS {
            let candidate = format!("{index_name}-reindex-{n}");
            if !self.cluster.index_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(ReindexError::NameExhausted {
            index: index_name.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// The operation record for an index, or `None` when absent. More than
    /// one record for the same index means the uniqueness invariant broke.
    pub async fn find_reindex_operation(
        &self,
        index_name: &str,
    ) -> Result<Option<StoredOperation>, ReindexError> {
        let mut docs = self.store.operations_by_index(index_name).await?;
        match docs.len() {
            0 => Ok(None),
            1 => Ok(Some(docs.remove(0))),
            _ => Err(ReindexError::MultipleOperations(index_name.to_string())),
        }
    }

    pub async fn find_all_by_status(
        &self,
        status: ReindexStatus,
    ) -> Result<Vec<StoredOperation>, ReindexError> {
        Ok(self.store.operations_by_status(status).await?)
    }

    pub async fn pause_reindex_operation(
        &self,
        index_name: &str,
    ) -> Result<StoredOperation, ReindexError> {
        self.update_status_while_locked(index_name, ReindexStatus::InProgress, ReindexStatus::Paused)
            .await
    }

    pub async fn resume_reindex_operation(
        &self,
        index_name: &str,
    ) -> Result<StoredOperation, ReindexError> {
        self.update_status_while_locked(index_name, ReindexStatus::Paused, ReindexStatus::InProgress)
            .await
    }

    async fn update_status_while_locked(
        &self,
        index_name: &str,
        expected: ReindexStatus,
        next: ReindexStatus,
    ) -> Result<StoredOperation, ReindexError> {
        let doc = self
            .find_reindex_operation(index_name)
            .await?
            .ok_or_else(|| ReindexError::OperationNotFound(index_name.to_string()))?;
        if doc.attributes.status != expected {
            return Err(ReindexError::InvalidState {
                index: index_name.to_string(),
                expected,
                actual: doc.attributes.status,
            });
        }

        let mut doc = self.acquire_lock(doc).await?;
        doc.attributes.status = next;
        doc.attributes.locked = None;
        Ok(self.store.update_operation(doc).await?)
    }

    /// Cancel the in-flight cluster task of an operation and mark the record
    /// cancelled. Only valid while the reindex task is running.
    pub async fn cancel_reindex_operation(
        &self,
        index_name: &str,
    ) -> Result<StoredOperation, ReindexError> {
        let doc = self
            .find_reindex_operation(index_name)
            .await?
            .ok_or_else(|| ReindexError::OperationNotFound(index_name.to_string()))?;
        if doc.attributes.status != ReindexStatus::InProgress {
            return Err(ReindexError::InvalidState {
                index: index_name.to_string(),
                expected: ReindexStatus::InProgress,
                actual: doc.attributes.status,
            });
        }
        let task_id = match (
            doc.attributes.last_completed_step,
            doc.attributes.reindex_task_id.clone(),
        ) {
            (ReindexStep::ReindexStarted, Some(task_id)) => task_id,
            (step, _) => {
                return Err(ReindexError::NoRunningTask {
                    index: index_name.to_string(),
                    step,
                });
            }
        };

        let mut doc = self.acquire_lock(doc).await?;
        if let Err(err) = self.cluster.cancel_task(&task_id).await {
            if let Err(release_err) = self.release_lock(doc).await {
                warn!(index = index_name, error = %release_err, "failed to release lease");
            }
            return Err(err.into());
        }
        doc.attributes.status = ReindexStatus::Cancelled;
        doc.attributes.locked = None;
        let doc = self.store.update_operation(doc).await?;
        info!(index = index_name, task_id = %task_id, "reindex cancelled");
        self.cleanup_changes(&doc.attributes).await;
        Ok(doc)
    }

    /// Advance an operation one step under its lease.
    ///
    /// Transient problems (lease held elsewhere, lost version race,
    /// unacknowledged cluster response) leave the record untouched for the
    /// next poll tick. Any other error marks the record failed and runs
    /// best-effort cleanup. The lease is always released on exit.
    pub async fn process_next_step(
        &self,
        doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        let doc = self.acquire_lock(doc).await?;
        let index_name = doc.attributes.index_name.clone();

        let doc = match self.execute_step(doc.clone()).await {
            Ok(doc) => doc,
            Err(err) if err.is_transient() => {
                debug!(index = %index_name, error = %err, "step deferred");
                doc
            }
            Err(err) => {
                error!(index = %index_name, error = %err, "reindex step failed");
                let mut failed = doc;
                failed.attributes.status = ReindexStatus::Failed;
                failed.attributes.error_message = Some(err.to_string());
                let failed = self.store.update_operation(failed).await?;
                self.cleanup_changes(&failed.attributes).await;
                failed
            }
        };

        self.release_lock(doc).await
    }

    async fn execute_step(&self, doc: StoredOperation) -> Result<StoredOperation, ReindexError> {
        // Only in-progress records advance; anything else is handed back
        // unchanged so callers don't have to pre-filter.
        if doc.attributes.status != ReindexStatus::InProgress {
            return Ok(doc);
        }
        match doc.attributes.last_completed_step {
            ReindexStep::Created => self.set_ml_upgrade_mode(doc).await,
            ReindexStep::MlUpgradeModeSet => self.set_readonly(doc).await,
            ReindexStep::Readonly => self.create_new_index(doc).await,
            ReindexStep::NewIndexCreated => self.start_reindexing(doc).await,
            ReindexStep::ReindexStarted => self.update_reindex_progress(doc).await,
            ReindexStep::ReindexCompleted => self.switch_alias(doc).await,
            ReindexStep::AliasCreated => self.finish(doc).await,
            ReindexStep::MlUpgradeModeUnset => Ok(doc),
        }
    }

    async fn advance(
        &self,
        mut doc: StoredOperation,
        step: ReindexStep,
    ) -> Result<StoredOperation, ReindexError> {
        debug!(index = %doc.attributes.index_name, step = ?step, "step completed");
        doc.attributes.last_completed_step = step;
        Ok(self.store.update_operation(doc).await?)
    }

    async fn set_ml_upgrade_mode(
        &self,
        doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        if is_ml_index(&doc.attributes.index_name) {
            self.increment_ml_reindexes().await?;
        }
        self.advance(doc, ReindexStep::MlUpgradeModeSet).await
    }

    async fn set_readonly(&self, doc: StoredOperation) -> Result<StoredOperation, ReindexError> {
        let acknowledged = self
            .cluster
            .put_settings(
                &doc.attributes.index_name,
                json!({"index.blocks.write": true}),
            )
            .await?;
        if !acknowledged {
            return Err(ReindexError::NotAcknowledged("write block"));
        }
        self.advance(doc, ReindexStep::Readonly).await
    }

    async fn create_new_index(
        &self,
        doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        let index_name = &doc.attributes.index_name;
        let flat = self
            .cluster
            .flat_settings(index_name)
            .await?
            .ok_or_else(|| ReindexError::IndexNotFound(index_name.clone()))?;
        let transformed = transform_flat_settings(&flat);

        let acknowledged = self
            .cluster
            .create_index(
                &doc.attributes.new_index_name,
                json!({
                    "settings": transformed.settings,
                    "mappings": transformed.mappings,
                }),
            )
            .await?;
        if !acknowledged {
            return Err(ReindexError::NotAcknowledged("index creation"));
        }
        self.advance(doc, ReindexStep::NewIndexCreated).await
    }

    async fn start_reindexing(
        &self,
        mut doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        let index_name = &doc.attributes.index_name;
        let flat = self
            .cluster
            .flat_settings(index_name)
            .await?
            .ok_or_else(|| ReindexError::IndexNotFound(index_name.clone()))?;

        let paths = boolean_field_paths(&mapping_body(&flat.mappings));
        let script = if paths.is_empty() {
            None
        } else {
            debug!(index = %index_name, fields = paths.len(), "attaching boolean coercion script");
            Some(boolean_coercion_script(paths))
        };

        let task_id = self
            .cluster
            .start_reindex(index_name, &doc.attributes.new_index_name, script)
            .await?;
        info!(index = %index_name, task_id = %task_id, "reindex task dispatched");

        doc.attributes.reindex_task_id = Some(task_id);
        doc.attributes.reindex_task_perc_complete = Some(0.0);
        self.advance(doc, ReindexStep::ReindexStarted).await
    }

    async fn update_reindex_progress(
        &self,
        mut doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        let task_id =
            doc.attributes
                .reindex_task_id
                .clone()
                .ok_or_else(|| ReindexError::NoRunningTask {
                    index: doc.attributes.index_name.clone(),
                    step: doc.attributes.last_completed_step,
                })?;

        let task = self.cluster.task_status(&task_id).await?;
        if !task.completed {
            let perc = if task.total > 0 {
                task.created as f64 / task.total as f64
            } else {
                0.0
            };
            debug!(index = %doc.attributes.index_name, perc, "reindex in progress");
            doc.attributes.reindex_task_perc_complete = Some(perc);
            return Ok(self.store.update_operation(doc).await?);
        }

        if task.created < task.total {
            let reason = task
                .failures
                .first()
                .map(|failure| failure.to_string())
                .unwrap_or_else(|| {
                    format!("{} of {} documents copied", task.created, task.total)
                });
            return Err(ReindexError::TaskFailed { task_id, reason });
        }

        self.cluster.delete_task_doc(&task_id).await?;
        doc.attributes.reindex_task_perc_complete = Some(1.0);
        self.advance(doc, ReindexStep::ReindexCompleted).await
    }

    async fn switch_alias(&self, doc: StoredOperation) -> Result<StoredOperation, ReindexError> {
        let index_name = &doc.attributes.index_name;
        let new_index_name = &doc.attributes.new_index_name;

        let existing = self.cluster.index_aliases(index_name).await?;
        let mut actions = vec![AliasAction::Add {
            index: new_index_name.clone(),
            alias: index_name.clone(),
            properties: Default::default(),
        }];
        for (alias, properties) in existing {
            actions.push(AliasAction::Add {
                index: new_index_name.clone(),
                alias,
                properties: properties.as_object().cloned().unwrap_or_default(),
            });
        }
        actions.push(AliasAction::RemoveIndex {
            index: index_name.clone(),
        });

        let acknowledged = self.cluster.update_aliases(actions).await?;
        if !acknowledged {
            return Err(ReindexError::NotAcknowledged("alias switch"));
        }
        info!(index = %index_name, new_index = %new_index_name, "alias switched");
        self.advance(doc, ReindexStep::AliasCreated).await
    }

    /// Terminal step: release the ML counter for ML indices (a no-op toggle
    /// for everything else) and mark the record completed.
    async fn finish(&self, mut doc: StoredOperation) -> Result<StoredOperation, ReindexError> {
        if is_ml_index(&doc.attributes.index_name) {
            self.decrement_ml_reindexes().await?;
        }
        doc.attributes.last_completed_step = ReindexStep::MlUpgradeModeUnset;
        doc.attributes.status = ReindexStatus::Completed;
        doc.attributes.reindex_task_id = None;
        let doc = self.store.update_operation(doc).await?;
        info!(
            index = %doc.attributes.index_name,
            new_index = %doc.attributes.new_index_name,
            "reindex completed"
        );
        Ok(doc)
    }

    /// Best-effort rollback after a failure or cancellation: lift the write
    /// block and release the ML counter if this operation held it. The
    /// partially created destination index is left in place for inspection.
    /// Errors here are logged, never propagated.
    async fn cleanup_changes(&self, op: &ReindexOperation) {
        if op.last_completed_step >= ReindexStep::Readonly {
            match self
                .cluster
                .put_settings(&op.index_name, json!({"index.blocks.write": false}))
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(index = %op.index_name, "write block rollback not acknowledged");
                }
                Err(err) => {
                    warn!(index = %op.index_name, error = %err, "failed to roll back write block");
                }
            }
        }

        if is_ml_index(&op.index_name)
            && op.last_completed_step >= ReindexStep::MlUpgradeModeSet
            && op.last_completed_step < ReindexStep::MlUpgradeModeUnset
        {
            if let Err(err) = self.decrement_ml_reindexes().await {
                warn!(index = %op.index_name, error = %err, "failed to release ML counter");
            }
        }
    }

    // Lease discipline ------------------------------------------------------

    async fn acquire_lock(
        &self,
        mut doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        let now = Utc::now();
        if let Some(locked) = doc.attributes.locked {
            if now - locked < Duration::seconds(LOCK_WINDOW_SECS) {
                return Err(ReindexError::Locked(doc.attributes.index_name.clone()));
            }
            warn!(index = %doc.attributes.index_name, "stealing abandoned lease");
        }
        doc.attributes.locked = Some(now);
        Ok(self.store.update_operation(doc).await?)
    }

    async fn release_lock(
        &self,
        mut doc: StoredOperation,
    ) -> Result<StoredOperation, ReindexError> {
        doc.attributes.locked = None;
        Ok(self.store.update_operation(doc).await?)
    }

    // ML counter ------------------------------------------------------------

    async fn acquire_ml_lock(&self) -> Result<StoredMlCounter, ReindexError> {
        with_retry(&self.retry, "acquire ML counter lock", || {
            let store = Arc::clone(&self.store);
            async move {
                let mut counter = store.ml_counter().await?;
                if let Some(locked) = counter.attributes.locked {
                    if Utc::now() - locked < Duration::seconds(LOCK_WINDOW_SECS) {
                        return Err(ReindexError::Locked(ML_COUNTER_ID.to_string()));
                    }
                }
                counter.attributes.locked = Some(Utc::now());
                Ok(store.update_ml_counter(counter).await?)
            }
        })
        .await
        .map_err(|err| match err {
            ReindexError::Locked(_) | ReindexError::VersionConflict => {
                ReindexError::MlLockUnavailable
            }
            other => other,
        })
    }

    async fn release_ml_lock(&self, mut counter: StoredMlCounter) -> Result<(), ReindexError> {
        counter.attributes.locked = None;
        self.store.update_ml_counter(counter).await?;
        Ok(())
    }

    /// Register one more in-flight ML reindex. The first registration
    /// validates node versions and flips the global upgrade mode on.
    async fn increment_ml_reindexes(&self) -> Result<(), ReindexError> {
        let mut counter = self.acquire_ml_lock().await?;

        let result = async {
            if counter.attributes.ml_reindex_count == 0 {
                self.validate_node_versions().await?;
                if !self.cluster.set_ml_upgrade_mode(true).await? {
                    return Err(ReindexError::NotAcknowledged("ML upgrade mode enable"));
                }
                info!("ML upgrade mode enabled");
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                counter.attributes.ml_reindex_count += 1;
                counter.attributes.locked = None;
                self.store.update_ml_counter(counter).await?;
                Ok(())
            }
            Err(err) => {
                if let Err(release_err) = self.release_ml_lock(counter).await {
                    warn!(error = %release_err, "failed to release ML counter lock");
                }
                Err(err)
            }
        }
    }

    /// Deregister one in-flight ML reindex, flipping upgrade mode off when
    /// the count returns to zero.
    async fn decrement_ml_reindexes(&self) -> Result<(), ReindexError> {
        let mut counter = self.acquire_ml_lock().await?;

        let result = async {
            if counter.attributes.ml_reindex_count == 1 {
                if !self.cluster.set_ml_upgrade_mode(false).await? {
                    return Err(ReindexError::NotAcknowledged("ML upgrade mode disable"));
                }
                info!("ML upgrade mode disabled");
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                counter.attributes.ml_reindex_count =
                    (counter.attributes.ml_reindex_count - 1).max(0);
                counter.attributes.locked = None;
                self.store.update_ml_counter(counter).await?;
                Ok(())
            }
            Err(err) => {
                if let Err(release_err) = self.release_ml_lock(counter).await {
                    warn!(error = %release_err, "failed to release ML counter lock");
                }
                Err(err)
            }
        }
    }

    async fn validate_node_versions(&self) -> Result<(), ReindexError> {
        let required = format!(
            "{}.{}.{}",
            MIN_ML_NODE_VERSION.0, MIN_ML_NODE_VERSION.1, MIN_ML_NODE_VERSION.2
        );
        for version in self.cluster.node_versions().await? {
            match parse_version(&version) {
                Some(parsed) if parsed >= MIN_ML_NODE_VERSION => {}
                _ => {
                    return Err(ReindexError::NodeVersionBelowMinimum {
                        required,
                        found: version,
                    });
                }
            }
        }
        Ok(())
    }
}
