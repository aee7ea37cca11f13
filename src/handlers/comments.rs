use axum::{extract::State, http::StatusCode, response::Json};
use validator::Validate;

use crate::{
    AppState,
    auth::AuthUser,
    error::Result,
    models::{Comment, CreateCommentRequest},
    services::post_service,
};

pub async fn create_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>)> {
    payload.validate()?;

    let comment = post_service::create_comment(
        state.store.as_ref(),
        &auth_user.user_id,
        &payload,
        state.clock.now(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}
