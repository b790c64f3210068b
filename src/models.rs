use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds a lease may be held before another worker is allowed to steal it.
/// Must exceed the worst-case duration of a single step body; the actual
/// reindex runs as a cluster-side task and is only polled under the lease.
pub const LOCK_WINDOW_SECS: i64 = 90;

/// Well-known id of the singleton ML counter document.
pub const ML_COUNTER_ID: &str = "upgrade-assistant-ml";

/// Index name prefixes owned by the cluster's ML subsystem. Reindexing any of
/// these requires the global upgrade-mode toggle.
const ML_INDEX_PREFIXES: &[&str] = &[".ml-state", ".ml-anomalies", ".ml-config"];

pub fn is_ml_index(index_name: &str) -> bool {
    ML_INDEX_PREFIXES.iter().any(|p| index_name.starts_with(p))
}

/// Lifecycle state of a reindex operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReindexStatus {
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ReindexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReindexStatus::InProgress => "inProgress",
            ReindexStatus::Paused => "paused",
            ReindexStatus::Completed => "completed",
            ReindexStatus::Failed => "failed",
            ReindexStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inProgress" => Some(ReindexStatus::InProgress),
            "paused" => Some(ReindexStatus::Paused),
            "completed" => Some(ReindexStatus::Completed),
            "failed" => Some(ReindexStatus::Failed),
            "cancelled" => Some(ReindexStatus::Cancelled),
            _ => None,
        }
    }
}

/// Progress marker of a reindex operation. Variant order is the pipeline
/// order, so steps compare with `<`/`>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReindexStep {
    Created,
    MlUpgradeModeSet,
    Readonly,
    NewIndexCreated,
    ReindexStarted,
    ReindexCompleted,
    AliasCreated,
    MlUpgradeModeUnset,
}

impl ReindexStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReindexStep::Created => "created",
            ReindexStep::MlUpgradeModeSet => "mlUpgradeModeSet",
            ReindexStep::Readonly => "readonly",
            ReindexStep::NewIndexCreated => "newIndexCreated",
            ReindexStep::ReindexStarted => "reindexStarted",
            ReindexStep::ReindexCompleted => "reindexCompleted",
            ReindexStep::AliasCreated => "aliasCreated",
            ReindexStep::MlUpgradeModeUnset => "mlUpgradeModeUnset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ReindexStep::Created),
            "mlUpgradeModeSet" => Some(ReindexStep::MlUpgradeModeSet),
            "readonly" => Some(ReindexStep::Readonly),
            "newIndexCreated" => Some(ReindexStep::NewIndexCreated),
            "reindexStarted" => Some(ReindexStep::ReindexStarted),
            "reindexCompleted" => Some(ReindexStep::ReindexCompleted),
            "aliasCreated" => Some(ReindexStep::AliasCreated),
            "mlUpgradeModeUnset" => Some(ReindexStep::MlUpgradeModeUnset),
            _ => None,
        }
    }
}

/// Persisted state of one index migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexOperation {
    pub index_name: String,
    pub new_index_name: String,
    pub status: ReindexStatus,
    pub last_completed_step: ReindexStep,
    /// Timestamp of the moment a worker acquired the lease, if held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<DateTime<Utc>>,
    /// Server-side task id once the reindex has been dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reindex_task_id: Option<String>,
    /// Fraction of documents copied, in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reindex_task_perc_complete: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ReindexOperation {
    pub fn new(index_name: impl Into<String>, new_index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            new_index_name: new_index_name.into(),
            status: ReindexStatus::InProgress,
            last_completed_step: ReindexStep::Created,
            locked: None,
            reindex_task_id: None,
            reindex_task_perc_complete: None,
            error_message: None,
        }
    }
}

/// Singleton record counting in-flight ML-index reindexes. The global
/// upgrade-mode toggle flips on when the count leaves zero and off when it
/// returns to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlCounter {
    pub ml_reindex_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<DateTime<Utc>>,
}

/// A stored document together with the version observed when it was read.
/// Every update must present this version back to the store.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub id: String,
    pub version: i64,
    pub attributes: T,
}

pub type StoredOperation = Stored<ReindexOperation>;
pub type StoredMlCounter = Stored<MlCounter>;

/// Advisory findings about a source index, surfaced before the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReindexWarning {
    /// The deprecated `_all` meta field is enabled and will not transfer.
    AllField,
    /// Boolean fields may hold legacy string/integer values that the new
    /// major version no longer coerces; the copy rewrites them.
    BooleanFields,
    /// Legacy APM index whose mapping predates the current schema.
    ApmReindex,
}
