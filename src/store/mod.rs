//! Persistence for operation records and the ML counter.
//!
//! Every mutation is a compare-and-swap against the version the caller
//! observed when it read the document; a lost race surfaces as
//! [`StoreError::Conflict`]. Callers hold the returned document and thread
//! it through subsequent updates. This is the only synchronisation
//! primitive in the system — no in-process locks guard records.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresStore, connect_db};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{ReindexOperation, ReindexStatus, StoredMlCounter, StoredOperation};

#[async_trait]
pub trait ReindexStore: Send + Sync {
    /// Persist a new operation record and return it with its initial version.
    async fn create_operation(&self, op: ReindexOperation) -> Result<StoredOperation, StoreError>;

    /// Write back a document, bumping its version. Fails with
    /// [`StoreError::Conflict`] when the stored version has advanced past
    /// `doc.version`.
    async fn update_operation(&self, doc: StoredOperation) -> Result<StoredOperation, StoreError>;

    async fn delete_operation(&self, doc: &StoredOperation) -> Result<(), StoreError>;

    async fn operations_by_index(&self, index_name: &str)
    -> Result<Vec<StoredOperation>, StoreError>;

    async fn operations_by_status(
        &self,
        status: ReindexStatus,
    ) -> Result<Vec<StoredOperation>, StoreError>;

    /// Fetch the singleton ML counter, creating it lazily with a zero count.
    async fn ml_counter(&self) -> Result<StoredMlCounter, StoreError>;

    /// Compare-and-swap update of the ML counter, same semantics as
    /// [`update_operation`](Self::update_operation).
    async fn update_ml_counter(&self, doc: StoredMlCounter)
    -> Result<StoredMlCounter, StoreError>;
}
