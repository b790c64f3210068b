//! HTTP control surface: thin request validators over the service, plus the
//! worker nudge after creation.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ReindexError;
use crate::models::{ReindexOperation, ReindexWarning, StoredOperation};
use crate::service::ReindexService;
use crate::worker::ReindexWorker;

pub struct AppState {
    service: Arc<ReindexService>,
    worker: Arc<ReindexWorker>,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(
        service: Arc<ReindexService>,
        worker: Arc<ReindexWorker>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            service,
            worker,
            api_key,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    id: String,
    #[serde(flatten)]
    operation: ReindexOperation,
}

impl From<StoredOperation> for OperationResponse {
    fn from(doc: StoredOperation) -> Self {
        Self {
            id: doc.id,
            operation: doc.attributes,
        }
    }
}

struct ApiError(ReindexError);

impl From<ReindexError> for ApiError {
    fn from(err: ReindexError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReindexError::IndexNotFound(_) | ReindexError::OperationNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ReindexError::OperationExists(_) => StatusCode::CONFLICT,
            ReindexError::InvalidState { .. } | ReindexError::NoRunningTask { .. } => {
                StatusCode::BAD_REQUEST
            }
            err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_reindex(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<(StatusCode, Json<OperationResponse>), ApiError> {
    let doc = state.service.create_reindex_operation(&index_name).await?;
    // Wake the local worker instead of waiting out the poll interval.
    state.worker.force_refresh();
    Ok((StatusCode::CREATED, Json(doc.into())))
}

async fn get_reindex(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let doc = state
        .service
        .find_reindex_operation(&index_name)
        .await?
        .ok_or_else(|| ReindexError::OperationNotFound(index_name))?;
    Ok(Json(doc.into()))
}

async fn pause_reindex(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let doc = state.service.pause_reindex_operation(&index_name).await?;
    Ok(Json(doc.into()))
}

async fn resume_reindex(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let doc = state.service.resume_reindex_operation(&index_name).await?;
    Ok(Json(doc.into()))
}

async fn cancel_reindex(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let doc = state.service.cancel_reindex_operation(&index_name).await?;
    Ok(Json(doc.into()))
}

async fn get_warnings(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<Json<Vec<ReindexWarning>>, ApiError> {
    let warnings = state
        .service
        .detect_reindex_warnings(&index_name)
        .await?
        .ok_or(ReindexError::IndexNotFound(index_name))?;
    Ok(Json(warnings))
}

// ============================================================================
// Auth & Router
// ============================================================================

async fn auth(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    // Skip auth for OPTIONS requests (CORS preflight)
    if req.method() == Method::OPTIONS {
        return Ok(next.run(req).await);
    }
    match req.headers().get("X-API-Key").and_then(|v| v.to_str().ok()) {
        Some(key) if key == expected => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ]);

    Router::new()
        .route(
            "/reindex/{index_name}",
            post(create_reindex).get(get_reindex),
        )
        .route("/reindex/{index_name}/pause", post(pause_reindex))
        .route("/reindex/{index_name}/resume", post(resume_reindex))
        .route("/reindex/{index_name}/cancel", post(cancel_reindex))
        .route("/reindex/{index_name}/warnings", get(get_warnings))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReindexStatus, ReindexStep};

    #[test]
    fn operation_response_flattens_record_fields() {
        let doc = StoredOperation {
            id: "op-1".to_string(),
            version: 3,
            attributes: ReindexOperation::new("logs-2019", "logs-2019-reindex-0"),
        };
        let json = serde_json::to_value(OperationResponse::from(doc)).unwrap();
        assert_eq!(json["id"], "op-1");
        assert_eq!(json["indexName"], "logs-2019");
        assert_eq!(json["newIndexName"], "logs-2019-reindex-0");
        assert_eq!(json["status"], "inProgress");
        assert_eq!(json["lastCompletedStep"], "created");
        // The store version is internal and never leaves the API.
        assert!(json.get("version").is_none());
    }

    #[test]
    fn errors_map_to_client_visible_statuses() {
        let cases = [
            (
                ReindexError::IndexNotFound("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                ReindexError::OperationExists("x".into()),
                StatusCode::CONFLICT,
            ),
            (
                ReindexError::InvalidState {
                    index: "x".into(),
                    expected: ReindexStatus::InProgress,
                    actual: ReindexStatus::Paused,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ReindexError::Locked("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ReindexError::MultipleOperations("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ReindexError::NoRunningTask {
                    index: "x".into(),
                    step: ReindexStep::Created,
                },
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn warnings_serialise_as_camel_case_list() {
        let json = serde_json::to_value(vec![
            ReindexWarning::AllField,
            ReindexWarning::BooleanFields,
            ReindexWarning::ApmReindex,
        ])
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!(["allField", "booleanFields", "apmReindex"])
        );
    }
}
