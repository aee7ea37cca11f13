use chrono::{DateTime, Duration, Utc};

use crate::{
    config::RankingConfig,
    error::{AppError, Result},
    models::{
        Comment, CreateCommentRequest, CreatePostRequest, INITIAL_TIME_SCORE, Post,
        QualitySignals, ResourceType, new_id, validate_id,
    },
    services::{ranking_service, vote_service::VoteLedger},
    store::{COMMENTS, DocumentStore, Filter, ListQuery, NewDocument, POSTS},
};

pub async fn get_post_by_id(store: &dyn DocumentStore, post_id: &str) -> Result<Option<Post>> {
    validate_id("post", post_id)?;
    match store.get(POSTS, post_id).await? {
        Some(doc) => Ok(Some(Post::from_document(post_id.to_string(), doc)?)),
        None => Ok(None),
    }
}

pub async fn create_post(
    store: &dyn DocumentStore,
    author_id: &str,
    payload: &CreatePostRequest,
    now: DateTime<Utc>,
    ranking: &RankingConfig,
) -> Result<Post> {
    if payload.url.is_none() && payload.text.as_deref().is_none_or(str::is_empty) {
        return Err(AppError::InvalidArgument(
            "A post needs a url or text".to_string(),
        ));
    }

    let post = Post {
        id: new_id(),
        title: payload.title.trim().to_string(),
        url: payload.url.clone(),
        text: payload.text.clone(),
        author_id: author_id.to_string(),
        count_up: 0,
        count_down: 0,
        score: 0,
        time_score: INITIAL_TIME_SCORE,
        rank: ranking_service::rank(0, INITIAL_TIME_SCORE, None, ranking),
        created_at: now,
        quality: QualitySignals::default(),
    };

    store
        .create(
            POSTS,
            NewDocument {
                id: post.id.clone(),
                data: post.to_document()?,
                unique_key: None,
            },
        )
        .await?;

    tracing::info!("Post {} created by {}", post.id, author_id);
    Ok(post)
}

/// Owner-gated. Removes the post's vote records too; comments stay.
pub async fn delete_post(
    store: &dyn DocumentStore,
    ledger: &VoteLedger,
    caller: &str,
    post_id: &str,
) -> Result<usize> {
    let post = get_post_by_id(store, post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    if post.author_id != caller {
        return Err(AppError::Forbidden(
            "Only the author can delete this post".to_string(),
        ));
    }

    store.delete(POSTS, post_id).await?;
    let purged = ledger.purge_votes(ResourceType::Post, post_id).await?;

    tracing::info!("Post {} deleted ({} votes purged)", post_id, purged);
    Ok(purged)
}

pub async fn create_comment(
    store: &dyn DocumentStore,
    author_id: &str,
    payload: &CreateCommentRequest,
    now: DateTime<Utc>,
) -> Result<Comment> {
    if get_post_by_id(store, &payload.post_id).await?.is_none() {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    let comment = Comment {
        id: new_id(),
        post_id: payload.post_id.clone(),
        author_id: author_id.to_string(),
        text: payload.text.clone(),
        count_up: 0,
        count_down: 0,
        score: 0,
        created_at: now,
    };

    store
        .create(
            COMMENTS,
            NewDocument {
                id: comment.id.clone(),
                data: comment.to_document()?,
                unique_key: None,
            },
        )
        .await?;

    Ok(comment)
}

/// Front page: the top `limit` posts of the listing window by stored rank.
pub async fn list_ranked_posts(
    store: &dyn DocumentStore,
    now: DateTime<Utc>,
    window: Duration,
    limit: usize,
) -> Result<Vec<Post>> {
    let since = (now - window).timestamp_millis();
    let query = ListQuery::new(limit)
        .filter(Filter::gte("createdAt", since))
        .order_desc("rank");

    store
        .list(POSTS, &query)
        .await?
        .into_iter()
        .map(|(id, doc)| Post::from_document(id, doc))
        .collect()
}
