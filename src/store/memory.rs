use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ML_COUNTER_ID, MlCounter, ReindexOperation, ReindexStatus, Stored, StoredMlCounter,
    StoredOperation,
};
use crate::store::ReindexStore;

/// In-memory store with the same version semantics as the Postgres backend.
/// Used by the test suite and for running the orchestrator without a
/// database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    operations: HashMap<String, StoredOperation>,
    counter: Option<StoredMlCounter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReindexStore for MemoryStore {
    async fn create_operation(&self, op: ReindexOperation) -> Result<StoredOperation, StoreError> {
        let doc = Stored {
            id: Uuid::new_v4().to_string(),
            version: 1,
            attributes: op,
        };
        self.inner
            .lock()
            .operations
            .insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    async fn update_operation(&self, doc: StoredOperation) -> Result<StoredOperation, StoreError> {
        let mut inner = self.inner.lock();
        let current = inner
            .operations
            .get_mut(&doc.id)
            .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
        if current.version != doc.version {
            return Err(StoreError::Conflict(doc.id));
        }
        current.version += 1;
        current.attributes = doc.attributes;
        Ok(current.clone())
    }

    async fn delete_operation(&self, doc: &StoredOperation) -> Result<(), StoreError> {
        self.inner.lock().operations.remove(&doc.id);
        Ok(())
    }

    async fn operations_by_index(
        &self,
        index_name: &str,
    ) -> Result<Vec<StoredOperation>, StoreError> {
        Ok(self
            .inner
            .lock()
            .operations
            .values()
            .filter(|doc| doc.attributes.index_name == index_name)
            .cloned()
            .collect())
    }

    async fn operations_by_status(
        &self,
        status: ReindexStatus,
    ) -> Result<Vec<StoredOperation>, StoreError> {
        Ok(self
            .inner
            .lock()
            .operations
            .values()
            .filter(|doc| doc.attributes.status == status)
            .cloned()
            .collect())
    }

    async fn ml_counter(&self) -> Result<StoredMlCounter, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner
            .counter
            .get_or_insert_with(|| Stored {
                id: ML_COUNTER_ID.to_string(),
                version: 1,
                attributes: MlCounter::default(),
            })
            .clone())
    }

    async fn update_ml_counter(
        &self,
        doc: StoredMlCounter,
    ) -> Result<StoredMlCounter, StoreError> {
        let mut inner = self.inner.lock();
        let current = inner
            .counter
            .as_mut()
            .ok_or_else(|| StoreError::NotFound(ML_COUNTER_ID.to_string()))?;
        if current.version != doc.version {
            return Err(StoreError::Conflict(doc.id));
        }
        current.version += 1;
        current.attributes = doc.attributes;
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_requires_observed_version() {
        let store = MemoryStore::new();
        let doc = store
            .create_operation(ReindexOperation::new("logs", "logs-reindex-0"))
            .await
            .unwrap();

        // First writer wins.
        let mut fresh = doc.clone();
        fresh.attributes.status = ReindexStatus::Paused;
        let updated = store.update_operation(fresh).await.unwrap();
        assert_eq!(updated.version, doc.version + 1);

        // Second writer presents the stale version and loses.
        let mut stale = doc;
        stale.attributes.status = ReindexStatus::Failed;
        let err = store.update_operation(stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.operations_by_index("logs").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attributes.status, ReindexStatus::Paused);
    }

    #[tokio::test]
    async fn counter_is_created_lazily_and_versioned() {
        let store = MemoryStore::new();
        let counter = store.ml_counter().await.unwrap();
        assert_eq!(counter.attributes.ml_reindex_count, 0);

        let mut next = counter.clone();
        next.attributes.ml_reindex_count = 1;
        store.update_ml_counter(next).await.unwrap();

        // Stale version loses.
        let mut stale = counter;
        stale.attributes.ml_reindex_count = 5;
        assert!(store.update_ml_counter(stale).await.is_err());

        assert_eq!(store.ml_counter().await.unwrap().attributes.ml_reindex_count, 1);
    }

    #[tokio::test]
    async fn status_queries_filter_records() {
        let store = MemoryStore::new();
        store
            .create_operation(ReindexOperation::new("a", "a-reindex-0"))
            .await
            .unwrap();
        let b = store
            .create_operation(ReindexOperation::new("b", "b-reindex-0"))
            .await
            .unwrap();

        let mut paused = b.clone();
        paused.attributes.status = ReindexStatus::Paused;
        store.update_operation(paused).await.unwrap();

        let in_progress = store
            .operations_by_status(ReindexStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].attributes.index_name, "a");
    }
}
