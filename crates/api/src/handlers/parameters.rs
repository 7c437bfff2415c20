use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use cellcast_core::parameters::{ParameterUpdate, SAVED_MODE};

use crate::error::AppResult;
use crate::state::AppState;

/// POST /api/sparam
///
/// Store user-defined templates as the `saved` mode. Answers with plain
/// text, which the browser client shows verbatim.
pub async fn save_parameters(
    State(state): State<AppState>,
    body: Result<Json<ParameterUpdate>, JsonRejection>,
) -> AppResult<String> {
    let Json(update) = body?;
    let params = state.parameters.save(update).await?;
    Ok(format!(
        "Parameters saved as mode '{SAVED_MODE}' ({} time steps)",
        params.t.len()
    ))
}
