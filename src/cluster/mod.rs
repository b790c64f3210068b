//! Typed interface to the target cluster.
//!
//! The orchestrator owns no cluster state directly; indices, aliases and
//! tasks all live behind this trait. The production implementation speaks
//! the cluster's REST API ([`HttpClusterClient`]).

mod http;

pub use http::HttpClusterClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClusterError;

/// Minimum node version able to toggle ML upgrade mode.
pub const MIN_ML_NODE_VERSION: (u64, u64, u64) = (6, 7, 0);

/// An index's settings and mappings, settings in flat (dot-notation) form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatSettings {
    pub settings: Map<String, Value>,
    pub mappings: Map<String, Value>,
}

/// Progress snapshot of a server-side reindex task.
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub completed: bool,
    pub created: u64,
    pub total: u64,
    pub failures: Vec<Value>,
}

/// One entry in an atomic alias update. Serialises to the cluster's
/// `{"add": {...}}` / `{"remove_index": {...}}` action objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasAction {
    Add {
        index: String,
        alias: String,
        /// Alias properties carried over from the source (filter, routing).
        #[serde(flatten)]
        properties: Map<String, Value>,
    },
    RemoveIndex {
        index: String,
    },
}

/// Script attached to a reindex request, sent to the cluster verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexScript {
    pub lang: String,
    pub source: String,
    pub params: Value,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, ClusterError>;

    /// Flat settings and mappings of an index, or `None` if it does not
    /// exist.
    async fn flat_settings(&self, index: &str) -> Result<Option<FlatSettings>, ClusterError>;

    /// Apply settings to an index; returns whether the cluster acknowledged.
    async fn put_settings(&self, index: &str, settings: Value) -> Result<bool, ClusterError>;

    async fn create_index(&self, index: &str, body: Value) -> Result<bool, ClusterError>;

    /// Dispatch an asynchronous reindex and return the server-side task id.
    async fn start_reindex(
        &self,
        source: &str,
        dest: &str,
        script: Option<ReindexScript>,
    ) -> Result<String, ClusterError>;

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ClusterError>;

    /// Remove the completed task's record from the `.tasks` index.
    async fn delete_task_doc(&self, task_id: &str) -> Result<(), ClusterError>;

    async fn cancel_task(&self, task_id: &str) -> Result<(), ClusterError>;

    /// Aliases currently pointing at an index, keyed by alias name with
    /// their properties.
    async fn index_aliases(&self, index: &str) -> Result<Map<String, Value>, ClusterError>;

    /// Apply a list of alias actions in one atomic call.
    async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<bool, ClusterError>;

    async fn node_versions(&self) -> Result<Vec<String>, ClusterError>;

    async fn set_ml_upgrade_mode(&self, enabled: bool) -> Result<bool, ClusterError>;
}

/// Parse a `major.minor.patch` version, tolerating suffixes like
/// `7.0.0-SNAPSHOT`.
pub fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let core = version.split('-').next()?;
    let mut parts = core.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn alias_actions_serialise_to_cluster_shape() {
        let add = AliasAction::Add {
            index: "logs-2019-reindex-0".into(),
            alias: "logs-2019".into(),
            properties: Map::new(),
        };
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({"add": {"index": "logs-2019-reindex-0", "alias": "logs-2019"}})
        );

        let mut props = Map::new();
        props.insert("filter".into(), json!({"term": {"level": "error"}}));
        let filtered = AliasAction::Add {
            index: "dest".into(),
            alias: "errors".into(),
            properties: props,
        };
        assert_eq!(
            serde_json::to_value(&filtered).unwrap(),
            json!({"add": {
                "index": "dest",
                "alias": "errors",
                "filter": {"term": {"level": "error"}}
            }})
        );

        let remove = AliasAction::RemoveIndex {
            index: "logs-2019".into(),
        };
        assert_eq!(
            serde_json::to_value(&remove).unwrap(),
            json!({"remove_index": {"index": "logs-2019"}})
        );
    }

    #[test]
    fn versions_parse_with_and_without_suffix() {
        assert_eq!(parse_version("6.7.0"), Some((6, 7, 0)));
        assert_eq!(parse_version("7.0.0-SNAPSHOT"), Some((7, 0, 0)));
        assert_eq!(parse_version("6.8"), Some((6, 8, 0)));
        assert_eq!(parse_version("not-a-version"), None);
        assert!(parse_version("6.6.2").unwrap() < MIN_ML_NODE_VERSION);
        assert!(parse_version("6.7.1").unwrap() >= MIN_ML_NODE_VERSION);
    }
}
