//! Manual refresh endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Handler for /refresh_listen_process.
///
/// Runs a refresh through the cache debounce and returns the resulting
/// snapshot as JSON keyed by port. A failed scan answers 400 with the error.
#[instrument(skip(state))]
pub async fn refresh_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /refresh_listen_process request");

    let cache = state.cache.clone();
    let token = state.shutdown.child_token();
    match tokio::task::spawn_blocking(move || cache.refresh(&token)).await {
        Ok(Ok(outcome)) => {
            debug!("manual refresh: {:?}", outcome);
            let snapshot = state.cache.snapshot();
            (StatusCode::OK, Json(snapshot.as_ref().clone())).into_response()
        }
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => {
            error!("refresh task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "refresh task failed").into_response()
        }
    }
}
