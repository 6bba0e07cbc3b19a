//! REST Mirror Handlers
//!
//! The read facade: translates a cache key into an HTTP response. Maps
//! directly onto the cache's `get`: no retries, no transformation of
//! payload bytes. "Not yet cached" is an explicit 503, distinguishable
//! from a successful empty body.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::MirrorState;

/// Serve the last cached payload for `key`, bit-for-bit as fetched.
pub(super) async fn serve_cached(
    Path(key): Path<String>,
    State(state): State<MirrorState>,
) -> Response {
    if !state.keys().contains(&key) {
        return (StatusCode::NOT_FOUND, "unknown mirror key").into_response();
    }

    state.cache().get(&key).map_or_else(
        || (StatusCode::SERVICE_UNAVAILABLE, "not yet available").into_response(),
        |entry| {
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, entry.content_type)],
                entry.body.to_vec(),
            )
                .into_response()
        },
    )
}
