use fedplane_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { kind: "task", id } => ApiError::TaskNotFound(id),
            CoreError::Validation(msg) => ApiError::InvalidRequest(msg),
            other => ApiError::Core(other),
        }
    }
}

#[cfg(feature = "http")]
mod http {
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use fedplane_core::CoreError;

    use super::ApiError;

    impl ApiError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ApiError::TaskNotFound(_) => StatusCode::NOT_FOUND,
                ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::Core(e) => match e {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::Conflict(_) | CoreError::InvalidState { .. } => StatusCode::CONFLICT,
                    CoreError::Collaborator(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                },
            }
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            let body = serde_json::json!({ "error": self.to_string() });
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_task_maps_to_task_not_found() {
        let err = ApiError::from(CoreError::not_found("task", "t1"));
        assert!(matches!(err, ApiError::TaskNotFound(ref id) if id == "t1"));

        let err = ApiError::from(CoreError::not_found("federation cluster", "F1"));
        assert!(matches!(err, ApiError::Core(_)));
    }

    #[cfg(feature = "http")]
    #[test]
    fn retry_of_running_task_is_a_conflict() {
        use axum::http::StatusCode;
        use fedplane_model::TaskStatus;

        let err = ApiError::from(CoreError::InvalidState {
            task_id: "t1".into(),
            status: TaskStatus::Running,
            expected: "Failure",
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
