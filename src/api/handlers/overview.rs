use crate::api::AppState;
use crate::error::Result;
use crate::snapshot;
use axum::{extract::State, http::StatusCode, response::Html};
use chrono::Local;
use tracing::error;

/// Overview tables without the device identity column.
pub async fn index(
    State(state): State<AppState>,
) -> std::result::Result<Html<String>, StatusCode> {
    page(&state, false)
}

/// Overview tables with a leading device identity column.
pub async fn details(
    State(state): State<AppState>,
) -> std::result::Result<Html<String>, StatusCode> {
    page(&state, true)
}

fn page(state: &AppState, details: bool) -> std::result::Result<Html<String>, StatusCode> {
    render(state, details).map(Html).map_err(|e| {
        error!(error = %e, "cannot render overview");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn render(state: &AppState, details: bool) -> Result<String> {
    let tables = {
        let snap = snapshot::lock(&state.snapshot);
        state.overview.tables(&state.registry, &snap, details)
    };
    state.overview.render_html(&tables, Local::now())
}
