#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsboard::{
    models::{Comment, Post, QualitySignals, ResourceType, Vote, VoteDirection},
    store::{
        Bounds, COMMENTS, Document, DocumentStore, Filter, ListQuery, MemoryStore, NewDocument,
        POSTS, StoreError, StoreResult, VOTES,
    },
};
use tokio_util::sync::CancellationToken;

/// In-memory store with switchable faults.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_increments: Mutex<HashSet<String>>,
    failing_get_many: Mutex<HashSet<String>>,
    failing_updates: Mutex<HashSet<String>>,
    lists: AtomicUsize,
    cancel_on_list: Mutex<Option<(usize, CancellationToken)>>,
    vote_before_guarded_update: Mutex<Option<(String, NewDocument)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_increments_of(&self, field: &str) {
        self.failing_increments
            .lock()
            .unwrap()
            .insert(field.to_string());
    }

    pub fn fail_get_many_in(&self, collection: &str) {
        self.failing_get_many
            .lock()
            .unwrap()
            .insert(collection.to_string());
    }

    pub fn fail_updates_of(&self, id: &str) {
        self.failing_updates.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing_increments.lock().unwrap().clear();
        self.failing_get_many.lock().unwrap().clear();
        self.failing_updates.lock().unwrap().clear();
    }

    /// Cancels `token` while serving the `n`th list call.
    pub fn cancel_on_list(&self, n: usize, token: CancellationToken) {
        self.lists.store(0, Ordering::SeqCst);
        *self.cancel_on_list.lock().unwrap() = Some((n, token));
    }

    /// The next guarded update of post `post_id` first sees `vote` written
    /// and its `countUp`/`score` increments applied, as a concurrent upvote
    /// would.
    pub fn land_upvote_before_guarded_update(&self, post_id: &str, vote: NewDocument) {
        *self.vote_before_guarded_update.lock().unwrap() = Some((post_id.to_string(), vote));
    }

    fn unavailable(what: &str) -> StoreError {
        StoreError::Unavailable(format!("injected failure: {}", what))
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn get_many(
        &self,
        collection: &str,
        ids: &[String],
    ) -> StoreResult<Vec<(String, Document)>> {
        if self.failing_get_many.lock().unwrap().contains(collection) {
            return Err(Self::unavailable(collection));
        }
        self.inner.get_many(collection, ids).await
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<(String, Document)>> {
        let served = self.lists.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, token)) = self.cancel_on_list.lock().unwrap().as_ref() {
            if served == *n {
                token.cancel();
            }
        }
        self.inner.list(collection, query).await
    }

    async fn create(&self, collection: &str, doc: NewDocument) -> StoreResult<()> {
        self.inner.create(collection, doc).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> StoreResult<()> {
        if self.failing_updates.lock().unwrap().contains(id) {
            return Err(Self::unavailable(id));
        }
        self.inner.update(collection, id, patch).await
    }

    async fn update_many(
        &self,
        collection: &str,
        patches: Vec<(String, Document)>,
    ) -> StoreResult<Vec<(String, StoreResult<()>)>> {
        let failing = self.failing_updates.lock().unwrap().clone();
        let (broken, healthy): (Vec<_>, Vec<_>) = patches
            .into_iter()
            .partition(|(id, _)| failing.contains(id));

        let mut outcomes = self.inner.update_many(collection, healthy).await?;
        outcomes.extend(
            broken
                .into_iter()
                .map(|(id, _)| {
                    let err = Self::unavailable(&id);
                    (id, Err(err))
                }),
        );
        Ok(outcomes)
    }

    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
        patch: Document,
    ) -> StoreResult<bool> {
        let pending = {
            let mut slot = self.vote_before_guarded_update.lock().unwrap();
            match slot.as_ref() {
                Some((post_id, _)) if collection == POSTS && post_id == id => slot.take(),
                _ => None,
            }
        };
        if let Some((post_id, vote)) = pending {
            self.inner.create(VOTES, vote).await?;
            self.inner
                .increment(POSTS, &post_id, "countUp", 1, Bounds::NON_NEGATIVE)
                .await?;
            self.inner
                .increment(POSTS, &post_id, "score", 1, Bounds::UNBOUNDED)
                .await?;
        }
        self.inner.update_where(collection, id, guards, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.inner.delete(collection, id).await
    }

    async fn delete_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
    ) -> StoreResult<bool> {
        self.inner.delete_where(collection, id, guards).await
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
        bounds: Bounds,
    ) -> StoreResult<i64> {
        if self.failing_increments.lock().unwrap().contains(field) {
            return Err(Self::unavailable(field));
        }
        self.inner
            .increment(collection, id, field, delta, bounds)
            .await
    }
}

pub fn post(id: &str, created_at: DateTime<Utc>, score: i64) -> Post {
    Post {
        id: id.to_string(),
        title: format!("Post {}", id),
        url: Some(format!("https://example.com/{}", id)),
        text: None,
        author_id: "author".to_string(),
        count_up: score.max(0),
        count_down: (-score).max(0),
        score,
        time_score: 100.0,
        rank: 100.0,
        created_at,
        quality: QualitySignals::default(),
    }
}

pub async fn seed_post(store: &dyn DocumentStore, post: &Post) {
    store
        .create(
            POSTS,
            NewDocument {
                id: post.id.clone(),
                data: post.to_document().unwrap(),
                unique_key: None,
            },
        )
        .await
        .unwrap();
}

pub async fn seed_comment(store: &dyn DocumentStore, id: &str, post_id: &str) {
    let comment = Comment {
        id: id.to_string(),
        post_id: post_id.to_string(),
        author_id: "author".to_string(),
        text: "nice".to_string(),
        count_up: 0,
        count_down: 0,
        score: 0,
        created_at: Utc::now(),
    };
    store
        .create(
            COMMENTS,
            NewDocument {
                id: id.to_string(),
                data: comment.to_document().unwrap(),
                unique_key: None,
            },
        )
        .await
        .unwrap();
}

pub async fn stored_post(store: &dyn DocumentStore, id: &str) -> Post {
    let doc = store.get(POSTS, id).await.unwrap().unwrap();
    Post::from_document(id.to_string(), doc).unwrap()
}

/// A vote record as the ledger would write it.
pub fn vote_record(
    id: &str,
    user_id: &str,
    post_id: &str,
    direction: VoteDirection,
) -> NewDocument {
    let now = Utc::now();
    let vote = Vote {
        id: id.to_string(),
        user_id: user_id.to_string(),
        resource_id: post_id.to_string(),
        resource_type: ResourceType::Post,
        direction,
        created_at: now,
        updated_at: now,
    };
    NewDocument {
        id: id.to_string(),
        data: vote.to_document().unwrap(),
        unique_key: Some(Vote::unique_key(user_id, ResourceType::Post, post_id)),
    }
}
