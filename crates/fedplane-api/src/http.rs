use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use fedplane_model::TaskId;
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    handler::{ApiHandler, TaskQuery},
};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Routes:
    /// - GET /api/v1/tasks - List tasks (`taskType`, `taskIndex`, `status`, `limit`, `offset`)
    /// - GET /api/v1/tasks/{id} - Get task
    /// - POST /api/v1/tasks/{id}/retry - Retry a failed task
    /// - POST /api/v1/tasks/{id}/terminate - Force-terminate a task
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/tasks", get(list_tasks::<H>))
            .route("/api/v1/tasks/{id}", get(get_task::<H>))
            .route("/api/v1/tasks/{id}/retry", post(retry_task::<H>))
            .route("/api/v1/tasks/{id}/terminate", post(terminate_task::<H>))
            .with_state(self.handler)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryRequest {
    #[serde(default)]
    begin_step_name: String,
    #[serde(default)]
    updater: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    task_id: String,
}

/// GET /api/v1/tasks
async fn list_tasks<H>(
    State(handler): State<Arc<H>>,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    Ok(Json(handler.list_tasks(&query).await?))
}

/// GET /api/v1/tasks/{id}
async fn get_task<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    Ok(Json(handler.get_task(&TaskId::from(id)).await?))
}

/// POST /api/v1/tasks/{id}/retry
async fn retry_task<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
    Json(req): Json<RetryRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let task_id = TaskId::from(id);
    handler
        .retry_task(&task_id, &req.begin_step_name, req.updater.as_deref())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            task_id: task_id.to_string(),
        }),
    ))
}

/// POST /api/v1/tasks/{id}/terminate
async fn terminate_task<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let task_id = TaskId::from(id);
    handler.terminate_task(&task_id, None).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            task_id: task_id.to_string(),
        }),
    ))
}
