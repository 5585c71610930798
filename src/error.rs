use axum::http::StatusCode;
use tracing::error;

use crate::store::StoreError;

/// Map a store failure onto the HTTP surface: missing records are 404,
/// signup conflicts 409, backend trouble 503 (no retry at this layer).
pub fn store_err(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::NotFound => (StatusCode::NOT_FOUND, "Not found".into()),
        StoreError::DuplicateUsername => {
            (StatusCode::CONFLICT, "Username already taken".into())
        }
        StoreError::Unavailable(source) => {
            error!(error = %source, "storage backend unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage backend unavailable".into(),
            )
        }
    }
}

pub fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
