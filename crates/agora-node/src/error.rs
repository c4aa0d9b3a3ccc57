use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use agora_graph::GraphError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Nothing stored at {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Swarm unavailable")]
    SwarmUnavailable,

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            NodeError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            NodeError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            NodeError::SwarmUnavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            NodeError::Graph(e) => {
                tracing::error!(error = %e, "Graph request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
