use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};

use crate::AppState;
use crate::browser::{self, BrowseResponse};
use crate::error::AppError;

/// Slice-and-dice query over one analytics. Every slice dimension must be
/// bound by a query parameter carrying a range expression.
pub async fn browse(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<BrowseResponse>, AppError> {
    let mut conf = state.conf.clone();
    let response = browser::browse_analytics(&state.settings, &mut conf, &name, &params).await?;
    Ok(Json(response))
}
