use crate::api::AppState;
use crate::error::Result;
use crate::snapshot::{self, SharedSnapshot};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use tracing::error;

/// Prometheus text exposition of every series written so far.
pub async fn metrics(State(state): State<AppState>) -> std::result::Result<impl IntoResponse, StatusCode> {
    let body = encode(&state.snapshot).map_err(|e| {
        error!(error = %e, "cannot encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}

fn encode(shared: &SharedSnapshot) -> Result<String> {
    snapshot::lock(shared).sink().encode()
}
