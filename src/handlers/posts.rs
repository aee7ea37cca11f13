use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    AppState,
    auth::AuthUser,
    error::Result,
    models::{CreatePostRequest, ListPostsQuery, Post},
    services::post_service,
};

const DEFAULT_LIMIT: usize = 30;
const MAX_LIMIT: usize = 100;

pub async fn create_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>)> {
    payload.validate()?;

    let post = post_service::create_post(
        state.store.as_ref(),
        &auth_user.user_id,
        &payload,
        state.clock.now(),
        &state.config.ranking,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_posts(
    State(state): State<AppState>,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let posts = post_service::list_ranked_posts(
        state.store.as_ref(),
        state.clock.now(),
        state.config.ranking.listing_window,
        limit,
    )
    .await?;

    Ok(Json(json!({ "posts": posts })))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    auth_user: AuthUser,
) -> Result<StatusCode> {
    post_service::delete_post(
        state.store.as_ref(),
        &state.ledger,
        &auth_user.user_id,
        &post_id,
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
