use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::{
    AppState,
    auth::{AuthUser, OptionalAuthUser},
    error::{AppError, Result},
    models::{BatchVoteRequest, ResourceType, VoteRequest, VoteResult, VoteState},
    redis::vote_rate_limit_key,
};

/// Largest batch accepted in one request.
const MAX_BATCH: usize = 500;

pub async fn apply_vote(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResult>> {
    let intent = payload.parse()?;

    // Rate limiting - vote requests per user per hour
    if let Some(redis) = &state.redis {
        let key = vote_rate_limit_key(&auth_user.user_id);
        if !redis
            .check_rate_limit(&key, state.config.vote_rate_limit, 3600)
            .await?
        {
            return Err(AppError::RateLimit);
        }
    }

    let result = state
        .ledger
        .apply_vote(Some(&auth_user.user_id), &intent)
        .await?;
    Ok(Json(result))
}

pub async fn get_vote_state(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
) -> Result<Json<VoteState>> {
    let resource_type: ResourceType = resource_type.parse()?;
    let caller = auth_user.as_ref().map(|u| u.user_id.as_str());

    let vote_state = state
        .ledger
        .get_vote_state(caller, &resource_id, resource_type)
        .await?;
    Ok(Json(vote_state))
}

pub async fn get_vote_states_batch(
    State(state): State<AppState>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
    Json(payload): Json<BatchVoteRequest>,
) -> Result<Json<serde_json::Value>> {
    if payload.resources.len() > MAX_BATCH {
        return Err(AppError::InvalidArgument(format!(
            "At most {} resources per batch",
            MAX_BATCH
        )));
    }

    let caller = auth_user.as_ref().map(|u| u.user_id.as_str());
    let states = state
        .ledger
        .get_vote_states_batch(caller, &payload.resources)
        .await;

    Ok(Json(serde_json::json!({ "votes": states })))
}
