use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::cluster::{AliasAction, ClusterClient, FlatSettings, ReindexScript, TaskStatus};
use crate::error::ClusterError;

/// Client for the cluster REST API.
#[derive(Clone)]
pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClusterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fail on any non-success status, carrying the body for diagnosis.
    async fn check(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClusterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClusterError::Response {
            status: status.as_u16(),
            path: path.to_string(),
            body,
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClusterError> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = self.check(path, response).await?;
        Ok(response.json().await?)
    }

    async fn acknowledged(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<bool, ClusterError> {
        let body: Value = self.check(path, response).await?.json().await?;
        Ok(body
            .get("acknowledged")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn index_exists(&self, index: &str) -> Result<bool, ClusterError> {
        let path = format!("/{index}");
        let response = self.client.head(self.url(&path)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        self.check(&path, response).await?;
        Ok(true)
    }

    async fn flat_settings(&self, index: &str) -> Result<Option<FlatSettings>, ClusterError> {
        let path = format!("/{index}?flat_settings=true");
        let response = self.client.get(self.url(&path)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = self.check(&path, response).await?.json().await?;

        // The response is keyed by the concrete index name, which may differ
        // from the requested name when it resolves through an alias.
        let entry = body
            .as_object()
            .and_then(|indices| indices.values().next())
            .ok_or_else(|| ClusterError::Malformed {
                path: path.clone(),
                reason: "expected an object keyed by index name".to_string(),
            })?;

        let field = |name: &str| -> Map<String, Value> {
            entry
                .get(name)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        Ok(Some(FlatSettings {
            settings: field("settings"),
            mappings: field("mappings"),
        }))
    }

    async fn put_settings(&self, index: &str, settings: Value) -> Result<bool, ClusterError> {
        let path = format!("/{index}/_settings");
        let response = self
            .client
            .put(self.url(&path))
            .json(&settings)
            .send()
            .await?;
        self.acknowledged(&path, response).await
    }

    async fn create_index(&self, index: &str, body: Value) -> Result<bool, ClusterError> {
        let path = format!("/{index}");
        let response = self.client.put(self.url(&path)).json(&body).send().await?;
        self.acknowledged(&path, response).await
    }

    async fn start_reindex(
        &self,
        source: &str,
        dest: &str,
        script: Option<ReindexScript>,
    ) -> Result<String, ClusterError> {
        let path = "/_reindex?refresh=true&wait_for_completion=false";
        let mut body = json!({
            "source": {"index": source},
            "dest": {"index": dest},
        });
        if let Some(script) = script {
            body["script"] = serde_json::to_value(script).map_err(|e| ClusterError::Malformed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        }
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        let body: Value = self.check(path, response).await?.json().await?;
        body.get("task")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClusterError::Malformed {
                path: path.to_string(),
                reason: "missing task id".to_string(),
            })
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ClusterError> {
        let path = format!("/_tasks/{task_id}");
        let body = self.get_json(&path).await?;

        let count = |name: &str| {
            body.pointer(&format!("/task/status/{name}"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Ok(TaskStatus {
            completed: body
                .get("completed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created: count("created"),
            total: count("total"),
            failures: body
                .pointer("/response/failures")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn delete_task_doc(&self, task_id: &str) -> Result<(), ClusterError> {
        let path = format!("/.tasks/task/{task_id}");
        let response = self.client.delete(self.url(&path)).send().await?;
        let body: Value = self.check(&path, response).await?.json().await?;
        match body.get("result").and_then(Value::as_str) {
            Some("deleted") => Ok(()),
            other => Err(ClusterError::Malformed {
                path,
                reason: format!("unexpected delete result {other:?}"),
            }),
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), ClusterError> {
        let path = format!("/_tasks/{task_id}/_cancel");
        let response = self.client.post(self.url(&path)).send().await?;
        self.check(&path, response).await?;
        Ok(())
    }

    async fn index_aliases(&self, index: &str) -> Result<Map<String, Value>, ClusterError> {
        let path = format!("/{index}/_alias");
        let response = self.client.get(self.url(&path)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Map::new());
        }
        let body: Value = self.check(&path, response).await?.json().await?;
        Ok(body
            .as_object()
            .and_then(|indices| indices.values().next())
            .and_then(|entry| entry.get("aliases"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<bool, ClusterError> {
        let path = "/_aliases";
        let response = self
            .client
            .post(self.url(path))
            .json(&json!({"actions": actions}))
            .send()
            .await?;
        self.acknowledged(path, response).await
    }

    async fn node_versions(&self) -> Result<Vec<String>, ClusterError> {
        let body = self.get_json("/_nodes").await?;
        let nodes = body
            .get("nodes")
            .and_then(Value::as_object)
            .ok_or_else(|| ClusterError::Malformed {
                path: "/_nodes".to_string(),
                reason: "missing nodes object".to_string(),
            })?;
        Ok(nodes
            .values()
            .filter_map(|node| node.get("version").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn set_ml_upgrade_mode(&self, enabled: bool) -> Result<bool, ClusterError> {
        let path = format!("/_ml/set_upgrade_mode?enabled={enabled}");
        let response = self.client.post(self.url(&path)).send().await?;
        self.acknowledged(&path, response).await
    }
}
