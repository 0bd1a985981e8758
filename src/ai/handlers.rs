use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    auth::AuthUser,
    error::AppError,
    schema::{extract::ValidQuery, registry, Schema, Validated},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    pub prompt: String,
}

impl Validated for PromptQuery {
    fn schema() -> &'static Schema {
        &registry::AI_PROMPT
    }
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub text: String,
}

pub fn ai_routes() -> Router<AppState> {
    Router::new().route("/ai", get(complete))
}

/// Requires a verified email address.
#[instrument(skip(state, identity, query), fields(user_id = %identity.user_id))]
pub async fn complete(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ValidQuery(query): ValidQuery<PromptQuery>,
) -> Result<Json<CompletionResponse>, AppError> {
    identity.require_verified()?;
    let ai = state.ai.as_ref().ok_or(AppError::ProviderUnavailable)?;
    let text = ai
        .complete(&query.prompt)
        .await
        .map_err(AppError::Upstream)?;
    info!(chars = text.len(), "completion returned");
    Ok(Json(CompletionResponse { text }))
}
