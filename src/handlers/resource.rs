use axum::Json;
use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::models::transaction::TrType;
use crate::publisher;

#[derive(Debug, Deserialize)]
pub struct PublishForm {
    pub tr_type: String,
    /// JSON-encoded transaction object, forwarded verbatim.
    pub payload: String,
}

/// Accept one transaction for a resource channel and publish it to every
/// subscribed analytics.
pub async fn publish(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Form(form): Form<PublishForm>,
) -> Result<impl IntoResponse, AppError> {
    let tr_type: TrType = form
        .tr_type
        .parse()
        .map_err(|_| AppError::bad_request("Unknown transaction type", &form.tr_type))?;
    let mut conf = state.conf.clone();
    publisher::publish_transaction(&mut conf, &channel, tr_type, &form.payload).await?;
    tracing::info!(target: "activity", "{tr_type}\t{channel}\t{}", form.payload);
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "Accepted" }))))
}
