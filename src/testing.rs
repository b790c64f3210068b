//! Test doubles shared across the crate's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value, json};

use crate::cluster::{AliasAction, ClusterClient, FlatSettings, ReindexScript, TaskStatus};
use crate::error::ClusterError;
use crate::retry::RetryConfig;
use crate::service::ReindexService;
use crate::store::MemoryStore;

#[derive(Debug, Clone, Default)]
pub struct FakeIndex {
    pub settings: Map<String, Value>,
    pub mappings: Map<String, Value>,
    pub aliases: Map<String, Value>,
}

pub struct FakeClusterState {
    pub indices: HashMap<String, FakeIndex>,
    /// Scripted task responses, keyed by task id. A queue with more than one
    /// entry pops per poll; the last entry repeats.
    pub tasks: HashMap<String, VecDeque<TaskStatus>>,
    /// Overrides for ids handed out by `start_reindex`, in dispatch order.
    pub next_task_ids: VecDeque<String>,
    pub reindex_requests: Vec<(String, String, Option<ReindexScript>)>,
    pub alias_updates: Vec<Vec<AliasAction>>,
    pub ml_toggles: Vec<bool>,
    pub deleted_task_docs: Vec<String>,
    pub cancelled_tasks: Vec<String>,
    pub node_versions: Vec<String>,
    pub ack_settings: bool,
    pub ack_create_index: bool,
    pub ack_aliases: bool,
    pub ack_ml: bool,
    dispatched: usize,
}

impl Default for FakeClusterState {
    fn default() -> Self {
        Self {
            indices: HashMap::new(),
            tasks: HashMap::new(),
            next_task_ids: VecDeque::new(),
            reindex_requests: Vec::new(),
            alias_updates: Vec::new(),
            ml_toggles: Vec::new(),
            deleted_task_docs: Vec::new(),
            cancelled_tasks: Vec::new(),
            node_versions: vec!["7.0.0".to_string()],
            ack_settings: true,
            ack_create_index: true,
            ack_aliases: true,
            ack_ml: true,
            dispatched: 0,
        }
    }
}

/// Scripted in-memory stand-in for the cluster.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_index(name: &str, mappings: Value) -> Arc<Self> {
        let cluster = Self::new();
        cluster.add_index(name, json!({}), mappings);
        cluster
    }

    pub fn add_index(&self, name: &str, settings: Value, mappings: Value) {
        self.state.lock().indices.insert(
            name.to_string(),
            FakeIndex {
                settings: settings.as_object().cloned().unwrap_or_default(),
                mappings: mappings.as_object().cloned().unwrap_or_default(),
                aliases: Map::new(),
            },
        );
    }

    pub fn state(&self) -> MutexGuard<'_, FakeClusterState> {
        self.state.lock()
    }

    fn resolve<'a>(
        state: &'a FakeClusterState,
        name: &str,
    ) -> Option<(&'a String, &'a FakeIndex)> {
        if let Some((key, index)) = state.indices.get_key_value(name) {
            return Some((key, index));
        }
        state
            .indices
            .iter()
            .find(|(_, index)| index.aliases.contains_key(name))
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn index_exists(&self, index: &str) -> Result<bool, ClusterError> {
        Ok(Self::resolve(&self.state.lock(), index).is_some())
    }

    async fn flat_settings(&self, index: &str) -> Result<Option<FlatSettings>, ClusterError> {
        let state = self.state.lock();
        Ok(Self::resolve(&state, index).map(|(_, idx)| FlatSettings {
            settings: idx.settings.clone(),
            mappings: idx.mappings.clone(),
        }))
    }

    async fn put_settings(&self, index: &str, settings: Value) -> Result<bool, ClusterError> {
        let mut state = self.state.lock();
        if !state.ack_settings {
            return Ok(false);
        }
        let entry = state
            .indices
            .get_mut(index)
            .ok_or_else(|| ClusterError::Response {
                status: 404,
                path: format!("/{index}/_settings"),
                body: "index not found".to_string(),
            })?;
        if let Some(object) = settings.as_object() {
            for (key, value) in object {
                entry.settings.insert(key.clone(), value.clone());
            }
        }
        Ok(true)
    }

    async fn create_index(&self, index: &str, body: Value) -> Result<bool, ClusterError> {
        let mut state = self.state.lock();
        if !state.ack_create_index {
            return Ok(false);
        }
        let field = |name: &str| {
            body.get(name)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        state.indices.insert(
            index.to_string(),
            FakeIndex {
                settings: field("settings"),
                mappings: field("mappings"),
                aliases: Map::new(),
            },
        );
        Ok(true)
    }

    async fn start_reindex(
        &self,
        source: &str,
        dest: &str,
        script: Option<ReindexScript>,
    ) -> Result<String, ClusterError> {
        let mut state = self.state.lock();
        let task_id = match state.next_task_ids.pop_front() {
            Some(id) => id,
            None => format!("task-{}", state.dispatched),
        };
        state.dispatched += 1;
        state
            .reindex_requests
            .push((source.to_string(), dest.to_string(), script));
        state.tasks.entry(task_id.clone()).or_insert_with(|| {
            VecDeque::from([TaskStatus {
                completed: true,
                created: 1,
                total: 1,
                failures: Vec::new(),
            }])
        });
        Ok(task_id)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ClusterError> {
        let mut state = self.state.lock();
        let queue = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ClusterError::Response {
                status: 404,
                path: format!("/_tasks/{task_id}"),
                body: "task not found".to_string(),
            })?;
        let status = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(status)
    }

    async fn delete_task_doc(&self, task_id: &str) -> Result<(), ClusterError> {
        self.state.lock().deleted_task_docs.push(task_id.to_string());
        Ok(())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), ClusterError> {
        self.state.lock().cancelled_tasks.push(task_id.to_string());
        Ok(())
    }

    async fn index_aliases(&self, index: &str) -> Result<Map<String, Value>, ClusterError> {
        let state = self.state.lock();
        Ok(Self::resolve(&state, index)
            .map(|(_, idx)| idx.aliases.clone())
            .unwrap_or_default())
    }

    async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<bool, ClusterError> {
        let mut state = self.state.lock();
        if !state.ack_aliases {
            return Ok(false);
        }
        for action in &actions {
            match action {
                AliasAction::Add {
                    index,
                    alias,
                    properties,
                } => {
                    if let Some(entry) = state.indices.get_mut(index) {
                        entry
                            .aliases
                            .insert(alias.clone(), Value::Object(properties.clone()));
                    }
                }
                AliasAction::RemoveIndex { index } => {
                    state.indices.remove(index);
                }
            }
        }
        state.alias_updates.push(actions);
        Ok(true)
    }

    async fn node_versions(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self.state.lock().node_versions.clone())
    }

    async fn set_ml_upgrade_mode(&self, enabled: bool) -> Result<bool, ClusterError> {
        let mut state = self.state.lock();
        if !state.ack_ml {
            return Ok(false);
        }
        state.ml_toggles.push(enabled);
        Ok(true)
    }
}

/// Service over a fresh in-memory store and the given fake cluster, with
/// retry backoff tightened for tests.
pub fn service_with(cluster: Arc<FakeCluster>) -> (Arc<ReindexService>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ReindexService::new(store.clone(), cluster).with_retry_config(RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        backoff_multiplier: 2.0,
    });
    (Arc::new(service), store)
}
