//! /cp handler: provider account and job quota.

use axum::extract::State;
use axum::Json;

use cp_services::ProviderResources;

use super::{api_error, ApiError, ApiState};

pub async fn handle_cp_resources(
    State(state): State<ApiState>,
) -> Result<Json<ProviderResources>, ApiError> {
    state.orchestrator.resources().map(Json).map_err(api_error)
}
